// Action player: keyframe playback of motion pages
//
// Each step moves every controlled joint linearly from where it was last
// commanded to the step pose over the step time, then holds for the pause.
// A page repeats `repeat` times and then chains to `next` (0 = end).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::joint::{JointPositions, JointTargets};
use super::page::{DEFAULT_SPEED, Page, PageTable};

/// Duration of one page time unit at nominal speed
const PAGE_TIME_UNIT_MS: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("Page {index} does not exist")]
    InvalidPage { index: usize },

    #[error("Page {page} is still playing")]
    AlreadyRunning { page: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Idle,
    Running,
}

/// Where playback currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub page: usize,
    pub step: usize,
}

#[derive(Debug)]
struct Playback {
    page: usize,
    step: usize,
    repeats_left: u8,
    elapsed: u32,
    move_ticks: u32,
    pause_ticks: u32,
    from: JointTargets,
    to: JointTargets,
}

#[derive(Debug)]
pub struct ActionPlayer {
    table: Arc<PageTable>,
    tick_period: Duration,
    playback: Option<Playback>,
}

impl ActionPlayer {
    pub fn new(table: Arc<PageTable>, tick_period: Duration) -> Self {
        Self {
            table,
            tick_period,
            playback: None,
        }
    }

    /// Replace the page table. Only allowed while idle.
    pub fn load_pages(&mut self, table: Arc<PageTable>) -> Result<(), ActionError> {
        if let Some(p) = &self.playback {
            return Err(ActionError::AlreadyRunning { page: p.page });
        }
        self.table = table;
        Ok(())
    }

    pub fn pages(&self) -> &PageTable {
        &self.table
    }

    /// Begin playing a page.
    ///
    /// A start while another page is playing is rejected; the running page
    /// is left untouched.
    pub fn start(&mut self, index: usize) -> Result<(), ActionError> {
        let page = self
            .table
            .page(index)
            .ok_or(ActionError::InvalidPage { index })?;
        if let Some(p) = &self.playback {
            return Err(ActionError::AlreadyRunning { page: p.page });
        }

        if page.steps.is_empty() {
            debug!("Page {} has no steps, nothing to play", index);
            return Ok(());
        }

        info!("Playing page {} ({:?})", index, page.name);
        self.playback = Some(Playback {
            page: index,
            step: 0,
            repeats_left: page.repeat.max(1),
            elapsed: 0,
            move_ticks: 0,
            pause_ticks: 0,
            from: JointTargets::new(),
            to: JointTargets::new(),
        });
        Ok(())
    }

    /// Abandon playback immediately
    pub fn stop(&mut self) {
        if let Some(p) = self.playback.take() {
            info!("Stopped page {} at step {}", p.page, p.step);
        }
    }

    pub fn is_running(&self) -> bool {
        self.playback.is_some()
    }

    pub fn state(&self) -> PlayerState {
        if self.is_running() {
            PlayerState::Running
        } else {
            PlayerState::Idle
        }
    }

    pub fn progress(&self) -> Option<Progress> {
        self.playback.as_ref().map(|p| Progress {
            page: p.page,
            step: p.step,
        })
    }

    /// Compute this tick's targets. `None` once idle.
    pub fn tick(&mut self, current: &JointPositions) -> Option<JointTargets> {
        let tick_ms = self.tick_period.as_secs_f64() * 1000.0;
        let table = Arc::clone(&self.table);
        let playback = self.playback.as_mut()?;
        let page = table.page(playback.page)?;

        if playback.elapsed == 0 {
            let step = &page.steps[playback.step];
            playback.to = step.pose.clone();
            playback.from = step
                .pose
                .iter()
                .map(|(id, target)| (id, current.get(id).unwrap_or(target)))
                .collect();
            playback.move_ticks = units_to_ticks(step.time, page.speed, tick_ms).max(1);
            playback.pause_ticks = units_to_ticks(step.pause, page.speed, tick_ms);
        }

        playback.elapsed += 1;
        let targets = if playback.elapsed < playback.move_ticks {
            interpolate(
                &playback.from,
                &playback.to,
                playback.elapsed as f64 / playback.move_ticks as f64,
            )
        } else {
            playback.to.clone()
        };

        if playback.elapsed >= playback.move_ticks + playback.pause_ticks {
            self.advance(&table);
        }

        Some(targets)
    }

    /// Move to the next step, repeat, chained page, or idle
    fn advance(&mut self, table: &PageTable) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        let Some(page) = table.page(playback.page) else {
            self.playback = None;
            return;
        };

        playback.elapsed = 0;
        if playback.step + 1 < page.steps.len() {
            playback.step += 1;
            return;
        }
        if playback.repeats_left > 1 {
            playback.repeats_left -= 1;
            playback.step = 0;
            return;
        }

        match next_page(table, page) {
            Some((next, next_page)) => {
                debug!("Page {} chains to page {}", playback.page, next);
                playback.page = next;
                playback.step = 0;
                playback.repeats_left = next_page.repeat.max(1);
            }
            None => {
                info!("Page {} finished", playback.page);
                self.playback = None;
            }
        }
    }
}

fn next_page<'a>(table: &'a PageTable, page: &Page) -> Option<(usize, &'a Page)> {
    if page.next == 0 {
        return None;
    }
    let index = page.next as usize;
    table
        .page(index)
        .filter(|p| !p.steps.is_empty())
        .map(|p| (index, p))
}

/// Page time units to scheduler ticks, rounding up
fn units_to_ticks(units: u8, speed: u8, tick_ms: f64) -> u32 {
    if units == 0 || tick_ms <= 0.0 {
        return 0;
    }
    let speed = if speed == 0 { DEFAULT_SPEED } else { speed };
    let ms = units as f64 * PAGE_TIME_UNIT_MS * DEFAULT_SPEED as f64 / speed as f64;
    (ms / tick_ms).ceil() as u32
}

fn interpolate(from: &JointTargets, to: &JointTargets, fraction: f64) -> JointTargets {
    to.iter()
        .map(|(id, end)| {
            let start = from.get(id).unwrap_or(end) as f64;
            let pos = start + (end as f64 - start) * fraction;
            (id, pos.round() as u16)
        })
        .collect()
}
