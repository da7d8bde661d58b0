// Joint ids, device unit conversion and per-tick target sets

use std::collections::BTreeMap;

/// Number of actuators on the robot (ids 1..=NUM_JOINTS)
pub const NUM_JOINTS: u8 = 20;

pub const ID_R_SHOULDER_PITCH: u8 = 1;
pub const ID_L_SHOULDER_PITCH: u8 = 2;
pub const ID_R_SHOULDER_ROLL: u8 = 3;
pub const ID_L_SHOULDER_ROLL: u8 = 4;
pub const ID_R_ELBOW: u8 = 5;
pub const ID_L_ELBOW: u8 = 6;
pub const ID_R_HIP_YAW: u8 = 7;
pub const ID_L_HIP_YAW: u8 = 8;
pub const ID_R_HIP_ROLL: u8 = 9;
pub const ID_L_HIP_ROLL: u8 = 10;
pub const ID_R_HIP_PITCH: u8 = 11;
pub const ID_L_HIP_PITCH: u8 = 12;
pub const ID_R_KNEE: u8 = 13;
pub const ID_L_KNEE: u8 = 14;
pub const ID_R_ANKLE_PITCH: u8 = 15;
pub const ID_L_ANKLE_PITCH: u8 = 16;
pub const ID_R_ANKLE_ROLL: u8 = 17;
pub const ID_L_ANKLE_ROLL: u8 = 18;
pub const ID_HEAD_PAN: u8 = 19;
pub const ID_HEAD_TILT: u8 = 20;

/// Motor resolution: 4096 steps per revolution
const STEPS_PER_REVOLUTION: f64 = 4096.0;
const STEPS_PER_DEG: f64 = STEPS_PER_REVOLUTION / 360.0;

pub const CENTER_POSITION: u16 = 2048;
pub const MAX_POSITION: u16 = 4095;

/// Every actuator id
pub fn all_joints() -> impl Iterator<Item = u8> {
    1..=NUM_JOINTS
}

/// Arms and legs, without the head
pub fn body_joints() -> impl Iterator<Item = u8> {
    ID_R_SHOULDER_PITCH..=ID_L_ANKLE_ROLL
}

pub fn head_joints() -> impl Iterator<Item = u8> {
    ID_HEAD_PAN..=ID_HEAD_TILT
}

pub fn is_valid_joint(id: u8) -> bool {
    (1..=NUM_JOINTS).contains(&id)
}

/// Convert an angle from the joint's zero (degrees) to device units,
/// applying a calibration offset and clamping to the device range
pub fn angle_to_position(deg: f64, offset: i16) -> u16 {
    let raw = CENTER_POSITION as f64 + offset as f64 + deg * STEPS_PER_DEG;
    raw.round().clamp(0.0, MAX_POSITION as f64) as u16
}

/// Inverse of [`angle_to_position`]
pub fn position_to_angle(position: u16, offset: i16) -> f64 {
    (position as f64 - CENTER_POSITION as f64 - offset as f64) / STEPS_PER_DEG
}

/// Sparse set of target positions keyed by actuator id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JointTargets {
    targets: BTreeMap<u8, u16>,
}

impl JointTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: u8, position: u16) {
        self.targets.insert(id, position.min(MAX_POSITION));
    }

    pub fn get(&self, id: u8) -> Option<u16> {
        self.targets.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.targets.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, u16)> + '_ {
        self.targets.iter().map(|(&id, &pos)| (id, pos))
    }

    /// Keep only the targets for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(u8) -> bool) {
        self.targets.retain(|&id, _| keep(id));
    }
}

impl FromIterator<(u8, u16)> for JointTargets {
    fn from_iter<I: IntoIterator<Item = (u8, u16)>>(iter: I) -> Self {
        let mut targets = JointTargets::new();
        for (id, pos) in iter {
            targets.set(id, pos);
        }
        targets
    }
}

/// Last position commanded to each actuator, `None` until first commanded
#[derive(Debug, Clone, Default)]
pub struct JointPositions {
    positions: [Option<u16>; NUM_JOINTS as usize + 1],
}

impl JointPositions {
    pub fn get(&self, id: u8) -> Option<u16> {
        self.positions.get(id as usize).copied().flatten()
    }

    pub fn set(&mut self, id: u8, position: u16) {
        if let Some(slot) = self.positions.get_mut(id as usize) {
            *slot = Some(position);
        }
    }

    pub fn apply(&mut self, targets: &JointTargets) {
        for (id, pos) in targets.iter() {
            self.set(id, pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_conversion() {
        assert_eq!(angle_to_position(0.0, 0), 2048);
        assert_eq!(angle_to_position(90.0, 0), 3072);
        assert_eq!(angle_to_position(-90.0, 10), 1034);
        assert!((position_to_angle(3072, 0) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_angle_conversion_clamps() {
        assert_eq!(angle_to_position(400.0, 0), MAX_POSITION);
        assert_eq!(angle_to_position(-400.0, 0), 0);
    }

    #[test]
    fn test_joint_groups() {
        assert_eq!(body_joints().count(), 18);
        assert_eq!(head_joints().collect::<Vec<_>>(), vec![19, 20]);
        assert!(!is_valid_joint(0));
        assert!(!is_valid_joint(21));
    }

    #[test]
    fn test_positions_ignore_out_of_range_ids() {
        let mut positions = JointPositions::default();
        positions.set(25, 100);
        positions.set(3, 100);
        assert_eq!(positions.get(25), None);
        assert_eq!(positions.get(3), Some(100));
    }
}
