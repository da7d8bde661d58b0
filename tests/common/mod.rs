// Shared fixtures: a motion file and a fast-ticking config on disk
#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use biped_motion_runtime::bus::{SimBus, SimConnector};
use biped_motion_runtime::motion::joint::{all_joints, JointTargets};
use biped_motion_runtime::motion::{MotionState, Page, PageTable, Step};
use biped_motion_runtime::{MotionControl, Robot, RobotOptions};
use tempfile::NamedTempFile;

pub const SIT_POSITION: u16 = 1500;
pub const READY_POSITION: u16 = 2048;

pub fn pose(position: u16) -> JointTargets {
    all_joints().map(|id| (id, position)).collect()
}

pub fn page_table() -> PageTable {
    let mut pages = vec![Page::empty(); 32];
    pages[1] = Page::new(
        "wave",
        vec![
            Step::new(pose(2200), 3, 1),
            Step::new(pose(1900), 5, 0),
        ],
    );
    pages[8] = Page::new("walk ready", vec![Step::new(pose(READY_POSITION), 4, 0)]);
    pages[15] = Page::new("sit", vec![Step::new(pose(SIT_POSITION), 4, 2)]);
    PageTable::new(pages)
}

/// Motion file and config file; both must outlive the robot's initialize
pub struct Fixture {
    pub motion: NamedTempFile,
    pub config: NamedTempFile,
}

impl Fixture {
    pub fn new() -> Self {
        let mut motion = NamedTempFile::new().unwrap();
        motion.write_all(&page_table().encode()).unwrap();

        let mut config = NamedTempFile::new().unwrap();
        write!(
            config,
            r#"
            [bus]
            ports = ["/dev/ttyUSB0", "/dev/ttyUSB1"]

            [scheduler]
            period_ms = 1

            [walking]
            period_time_ms = 100.0
            "#
        )
        .unwrap();

        Self { motion, config }
    }

    pub fn options(&self) -> RobotOptions {
        RobotOptions {
            config_path: Some(self.config.path().to_path_buf()),
            motion_file: Some(self.motion.path().to_path_buf()),
            ports: Vec::new(),
        }
    }

    /// An initialized robot on simulated actuators, plus a handle on them
    pub fn robot(&self) -> (Robot, SimBus) {
        let connector = SimConnector::new(20);
        let bus = connector.bus();
        let robot = Robot::new(connector, self.options());
        assert!(robot.initialize());
        (robot, bus)
    }
}

/// Block until the scheduler has run `ticks` more ticks
pub fn wait_ticks(control: &Arc<MotionControl>, ticks: u64) {
    let core = control.core();
    let mut state = core.lock();
    let target = state.stats.ticks + ticks;
    core.wait_until(&mut state, |s: &MotionState| s.stats.ticks >= target)
        .unwrap();
}
