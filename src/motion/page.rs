// Motion page table (motion_4096.bin layout)
//
// The file is a flat array of 512-byte pages:
//   [0..64)    header: name[14], repeat@15, stepnum@20, speed@22,
//              next@25, exit@26, checksum@31
//   [64..512)  7 steps of 64 bytes: 31 x u16 LE positions, pause@62, time@63
// The byte sum of a whole page (checksum included) is 0xFF.

use std::path::Path;

use tracing::{debug, info};

use super::joint::{JointTargets, NUM_JOINTS};
use crate::error::LoadError;

pub const PAGE_SIZE: usize = 512;
pub const MAX_PAGES: usize = 256;
pub const MAX_STEPS: usize = 7;

const HEADER_SIZE: usize = 64;
const STEP_SIZE: usize = 64;
const NAME_LEN: usize = 14;
const POSITIONS_PER_STEP: usize = 31;

const OFFSET_REPEAT: usize = 15;
const OFFSET_STEPNUM: usize = 20;
const OFFSET_SPEED: usize = 22;
const OFFSET_NEXT: usize = 25;
const OFFSET_EXIT: usize = 26;
const OFFSET_CHECKSUM: usize = 31;
const OFFSET_PAUSE: usize = 62;
const OFFSET_TIME: usize = 63;

/// Position bit marking a joint the step does not control
const NOT_CONTROLLED: u16 = 0x4000;
const POSITION_MASK: u16 = 0x0FFF;

/// Nominal playback speed; step times are scaled by `DEFAULT_SPEED / speed`
pub const DEFAULT_SPEED: u8 = 32;

/// One keyframe of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Target for every joint the step controls
    pub pose: JointTargets,
    /// Time to reach the pose, in 8 ms units at nominal speed
    pub time: u8,
    /// Hold time after reaching the pose, same units
    pub pause: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub name: String,
    pub repeat: u8,
    pub speed: u8,
    pub next: u8,
    pub exit: u8,
    pub steps: Vec<Step>,
}

impl Page {
    /// An unnamed page with no steps (unused slot)
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            repeat: 1,
            speed: DEFAULT_SPEED,
            next: 0,
            exit: 0,
            steps: Vec::new(),
        }
    }

    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            steps,
            ..Self::empty()
        }
    }

    /// Parse one page slot
    fn parse(index: usize, bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.iter().all(|&b| b == 0) {
            return Ok(Self::empty());
        }

        let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0xFF {
            return Err(LoadError::CorruptFormat(format!(
                "page {} checksum mismatch (sum 0x{:02X})",
                index, sum
            )));
        }

        let step_count = bytes[OFFSET_STEPNUM] as usize;
        if step_count > MAX_STEPS {
            return Err(LoadError::CorruptFormat(format!(
                "page {} declares {} steps (max {})",
                index, step_count, MAX_STEPS
            )));
        }

        let name_bytes = &bytes[..NAME_LEN];
        let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = String::from_utf8_lossy(&name_bytes[..name_end]).trim().to_string();

        let steps = (0..step_count)
            .map(|s| {
                let start = HEADER_SIZE + s * STEP_SIZE;
                Step::parse(&bytes[start..start + STEP_SIZE])
            })
            .collect();

        let speed = match bytes[OFFSET_SPEED] {
            0 => DEFAULT_SPEED,
            speed => speed,
        };

        Ok(Self {
            name,
            repeat: bytes[OFFSET_REPEAT].max(1),
            speed,
            next: bytes[OFFSET_NEXT],
            exit: bytes[OFFSET_EXIT],
            steps,
        })
    }

    /// Serialize into a 512-byte slot with a valid checksum
    pub fn encode(&self) -> [u8; PAGE_SIZE] {
        let mut bytes = [0u8; PAGE_SIZE];

        for (dst, src) in bytes[..NAME_LEN].iter_mut().zip(self.name.bytes()) {
            *dst = src;
        }
        bytes[OFFSET_REPEAT] = self.repeat;
        bytes[OFFSET_STEPNUM] = self.steps.len().min(MAX_STEPS) as u8;
        bytes[OFFSET_SPEED] = self.speed;
        bytes[OFFSET_NEXT] = self.next;
        bytes[OFFSET_EXIT] = self.exit;

        for (s, step) in self.steps.iter().take(MAX_STEPS).enumerate() {
            let start = HEADER_SIZE + s * STEP_SIZE;
            step.encode(&mut bytes[start..start + STEP_SIZE]);
        }

        let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        bytes[OFFSET_CHECKSUM] = 0xFFu8.wrapping_sub(sum);
        bytes
    }
}

impl Step {
    pub fn new(pose: JointTargets, time: u8, pause: u8) -> Self {
        Self { pose, time, pause }
    }

    fn parse(bytes: &[u8]) -> Self {
        let mut pose = JointTargets::new();
        for id in 1..=NUM_JOINTS {
            let i = id as usize * 2;
            let raw = u16::from_le_bytes([bytes[i], bytes[i + 1]]);
            if raw & NOT_CONTROLLED == 0 {
                pose.set(id, raw & POSITION_MASK);
            }
        }

        Self {
            pose,
            time: bytes[OFFSET_TIME],
            pause: bytes[OFFSET_PAUSE],
        }
    }

    fn encode(&self, bytes: &mut [u8]) {
        for slot in 1..POSITIONS_PER_STEP {
            let raw = self.pose.get(slot as u8).unwrap_or(NOT_CONTROLLED);
            bytes[slot * 2..slot * 2 + 2].copy_from_slice(&raw.to_le_bytes());
        }
        bytes[OFFSET_PAUSE] = self.pause;
        bytes[OFFSET_TIME] = self.time;
    }
}

/// Immutable table of motion pages, loaded once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTable {
    pages: Vec<Page>,
}

impl PageTable {
    pub fn new(pages: Vec<Page>) -> Self {
        Self { pages }
    }

    /// Read and parse a motion file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| LoadError::missing(path, &e))?;
        let table = Self::parse(&bytes)?;
        info!("Loaded {} motion pages from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.is_empty() || bytes.len() % PAGE_SIZE != 0 {
            return Err(LoadError::CorruptFormat(format!(
                "motion file size {} is not a whole number of {}-byte pages",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let count = bytes.len() / PAGE_SIZE;
        if count > MAX_PAGES {
            return Err(LoadError::CorruptFormat(format!(
                "motion file holds {} pages (max {})",
                count, MAX_PAGES
            )));
        }

        let pages = bytes
            .chunks_exact(PAGE_SIZE)
            .enumerate()
            .map(|(i, chunk)| Page::parse(i, chunk))
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Parsed {} pages", pages.len());

        Ok(Self { pages })
    }

    pub fn encode(&self) -> Vec<u8> {
        self.pages.iter().flat_map(|p| p.encode()).collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    /// Index of the first page with this name (case-insensitive)
    pub fn page_index(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        self.pages
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(pairs: &[(u8, u16)]) -> JointTargets {
        pairs.iter().copied().collect()
    }

    fn sample_table() -> PageTable {
        let mut pages = vec![Page::empty(); 3];
        pages[1] = Page::new("stand", vec![Step::new(pose(&[(1, 2048), (19, 1000)]), 10, 2)]);
        pages[2] = Page {
            next: 1,
            speed: 64,
            ..Page::new(
                "Sit",
                vec![
                    Step::new(pose(&[(13, 3000)]), 5, 0),
                    Step::new(pose(&[(13, 3100), (14, 900)]), 20, 4),
                ],
            )
        };
        PageTable::new(pages)
    }

    #[test]
    fn test_parse_encoded_table() {
        let table = sample_table();
        let bytes = table.encode();
        assert_eq!(bytes.len(), 3 * PAGE_SIZE);

        let parsed = PageTable::parse(&bytes).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn test_uncontrolled_joints_are_skipped() {
        let parsed = PageTable::parse(&sample_table().encode()).unwrap();
        let step = &parsed.page(1).unwrap().steps[0];
        assert_eq!(step.pose.len(), 2);
        assert_eq!(step.pose.get(19), Some(1000));
        assert_eq!(step.pose.get(2), None);
    }

    #[test]
    fn test_bad_size_is_corrupt() {
        assert!(matches!(PageTable::parse(&[]), Err(LoadError::CorruptFormat(_))));
        assert!(matches!(
            PageTable::parse(&[0u8; PAGE_SIZE + 3]),
            Err(LoadError::CorruptFormat(_))
        ));
    }

    #[test]
    fn test_bad_checksum_rejects_whole_table() {
        let mut bytes = sample_table().encode();
        bytes[2 * PAGE_SIZE + HEADER_SIZE + 4] ^= 0x01;

        let err = PageTable::parse(&bytes).unwrap_err();
        assert!(matches!(err, LoadError::CorruptFormat(ref msg) if msg.contains("page 2")));
    }

    #[test]
    fn test_too_many_steps_is_corrupt() {
        let mut page = Page::new("x", vec![]).encode();
        page[OFFSET_STEPNUM] = 8;
        page[OFFSET_CHECKSUM] = page[OFFSET_CHECKSUM].wrapping_sub(8);

        assert!(matches!(PageTable::parse(&page), Err(LoadError::CorruptFormat(_))));
    }

    #[test]
    fn test_page_lookup_by_name() {
        let table = sample_table();
        assert_eq!(table.page_index("sit"), Some(2));
        assert_eq!(table.page_index("STAND"), Some(1));
        assert_eq!(table.page_index("bow"), None);
        assert_eq!(table.page_index(""), None);
    }

    #[test]
    fn test_load_missing_file() {
        let err = PageTable::load("/nonexistent/motion_4096.bin").unwrap_err();
        assert!(matches!(err, LoadError::MissingResource { .. }));
    }
}
