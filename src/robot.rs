// Host-facing robot handle
//
// Owns the bus connector, the loaded resources and, once initialized, the
// scheduler thread and control facade. Integer return codes follow the
// host convention: 0 success, -1 failure.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bus::{connect_first, ActuatorBus, BusConnector, Register};
use crate::config::RobotConfig;
use crate::control::{ControlError, MotionControl};
use crate::error::LoadError;
use crate::messages::RobotStatus;
use crate::motion::joint::{all_joints, MAX_POSITION};
use crate::motion::{
    ActionPlayer, GaitController, ModuleId, MotionCore, MotionScheduler, MotionState, PageTable,
};

/// Where `initialize` finds its inputs
#[derive(Debug, Clone, Default)]
pub struct RobotOptions {
    /// Tuning file; defaults apply when unset
    pub config_path: Option<PathBuf>,
    /// Overrides the motion file named in the config
    pub motion_file: Option<PathBuf>,
    /// Overrides the configured port list
    pub ports: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
enum InitError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("No controller found: {0}")]
    Bus(#[from] crate::bus::BusError),

    #[error("Failed to start motion scheduler: {0}")]
    Scheduler(#[from] std::io::Error),
}

struct Session {
    control: Arc<MotionControl>,
    // Stops the tick thread when the session is dropped
    _scheduler: MotionScheduler,
    port: String,
}

pub struct Robot {
    connector: Box<dyn BusConnector>,
    options: RobotOptions,
    session: Mutex<Option<Session>>,
}

impl Robot {
    pub fn new(connector: impl BusConnector + 'static, options: RobotOptions) -> Self {
        Self {
            connector: Box::new(connector),
            options,
            session: Mutex::new(None),
        }
    }

    /// Connect to the controller, load resources and start the scheduler.
    ///
    /// Returns false with nothing started if any step fails; calling it
    /// again retries from scratch. A second call after success is a no-op.
    pub fn initialize(&self) -> bool {
        let mut session = self.session.lock();
        if session.is_some() {
            return true;
        }

        match self.open_session() {
            Ok(opened) => {
                info!("Robot initialized on {}", opened.port);
                *session = Some(opened);
                true
            }
            Err(e) => {
                error!("Initialization failed: {}", e);
                false
            }
        }
    }

    fn open_session(&self) -> Result<Session, InitError> {
        let config = match &self.options.config_path {
            Some(path) => RobotConfig::load(path)?,
            None => RobotConfig::default(),
        };
        let motion_file = self
            .options
            .motion_file
            .clone()
            .unwrap_or_else(|| config.pages.motion_file.clone());
        let pages = Arc::new(PageTable::load(&motion_file)?);

        let ports = if self.options.ports.is_empty() {
            &config.bus.ports
        } else {
            &self.options.ports
        };
        let (port, mut bus) = connect_first(self.connector.as_ref(), ports)?;

        let period = config.scheduler.period();
        let mut state = MotionState::new(
            ActionPlayer::new(pages, period),
            GaitController::new(config.walking.clone(), period),
        );
        seed_positions(&mut state, bus.as_mut(), &config);
        // Ownership starts out all free, so this cannot conflict
        if let Err(conflict) = state.ownership.enable_all(ModuleId::Action, all_joints()) {
            panic!("joint ownership invariant violated: {}", conflict);
        }

        let core = MotionCore::new(state, bus, |id| config.offset(id));
        let scheduler = MotionScheduler::start(Arc::clone(&core), period)?;
        let control = MotionControl::new(core, config.pages.clone(), config.walking.clone());

        Ok(Session {
            control: Arc::new(control),
            _scheduler: scheduler,
            port,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Port the controller was found on
    pub fn port(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.port.clone())
    }

    /// Handle to the control facade; `None` before a successful `initialize`
    pub fn control(&self) -> Option<Arc<MotionControl>> {
        self.session.lock().as_ref().map(|s| Arc::clone(&s.control))
    }

    fn run<T>(
        &self,
        what: &str,
        op: impl FnOnce(&MotionControl) -> Result<T, ControlError>,
    ) -> Option<T> {
        let Some(control) = self.control() else {
            warn!("{}: robot not initialized", what);
            return None;
        };
        match op(&control) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("{}: {}", what, e);
                None
            }
        }
    }

    /// Power the actuators
    pub fn startup(&self) -> bool {
        self.run("startup", |c| c.power_up()).is_some()
    }

    /// Sit down and cut power
    pub fn shutdown(&self) -> bool {
        self.run("shutdown", |c| c.power_down()).is_some()
    }

    /// Play a page to completion
    pub fn play_action(&self, page: i32) -> i32 {
        let Ok(index) = usize::try_from(page) else {
            warn!("play_action: invalid page {}", page);
            return -1;
        };
        match self.run("play_action", |c| c.play_action(index)) {
            Some(()) => 0,
            None => -1,
        }
    }

    pub fn play_action_by_name(&self, name: &str) -> i32 {
        match self.run("play_action", |c| c.play_action_by_name(name)) {
            Some(_) => 0,
            None => -1,
        }
    }

    pub fn stop_action(&self) {
        self.run("stop_action", |c| {
            c.stop_action();
            Ok(())
        });
    }

    pub fn set_walking(&self, on: bool) -> bool {
        self.run("set_walking", |c| c.set_walking(on)).is_some()
    }

    pub fn set_velocity_from_joystick(&self, x: i32, y: i32) -> bool {
        self.run("joystick", |c| c.set_velocity_from_joystick(x, y))
            .is_some()
    }

    pub fn walk_forward(&self, amount: f64) -> bool {
        self.run("walk_forward", |c| c.walk_forward(amount)).is_some()
    }

    pub fn walk_turn(&self, amount: f64) -> bool {
        self.run("walk_turn", |c| c.walk_turn(amount)).is_some()
    }

    /// First actuator that does not answer a ping, 0 if all do, -1 on error
    pub fn check_actuators(&self) -> i32 {
        match self.run("check_actuators", |c| c.check_actuators()) {
            Some(Some(id)) => id as i32,
            Some(None) => 0,
            None => -1,
        }
    }

    /// Controller supply voltage in 0.1 V units, -1 on failure
    pub fn read_battery_level(&self) -> i32 {
        self.run("battery", |c| c.battery_level())
            .map_or(-1, i32::from)
    }

    /// Write a raw goal position, bypassing module ownership
    pub fn set_actuator_target(&self, id: i32, value: i32) -> bool {
        let Ok(value) = u16::try_from(value) else {
            warn!("set_actuator_target: value {} out of range", value);
            return false;
        };
        self.run("set_actuator_target", |c| c.set_actuator_target(id, value))
            .is_some()
    }

    /// Raw goal position, -1 on failure
    pub fn get_actuator_target(&self, id: i32) -> i32 {
        self.run("get_actuator_target", |c| c.actuator_target(id))
            .map_or(-1, i32::from)
    }

    pub fn status(&self) -> Option<RobotStatus> {
        self.control().map(|c| c.status())
    }
}

/// Start from where the actuators physically are, so the first page
/// interpolates from the real pose instead of jumping.
fn seed_positions(state: &mut MotionState, bus: &mut dyn ActuatorBus, config: &RobotConfig) {
    for id in all_joints() {
        match bus.read_register(id, Register::PresentPosition) {
            Ok(value) => {
                let logical = (value as i32 - config.offset(id) as i32).clamp(0, MAX_POSITION as i32) as u16;
                state.positions.set(id, logical);
            }
            Err(e) => warn!("Actuator {} position unknown: {}", id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusEvent, SimConnector};
    use crate::motion::{Page, Step};
    use crate::motion::joint::JointTargets;
    use std::io::Write;

    fn motion_file() -> tempfile::NamedTempFile {
        let pose: JointTargets = all_joints().map(|id| (id, 2100)).collect();
        let mut pages = vec![Page::empty(); 16];
        pages[1] = Page::new("stand", vec![Step::new(pose, 4, 0)]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&PageTable::new(pages).encode()).unwrap();
        file
    }

    fn options(motion: &tempfile::NamedTempFile) -> RobotOptions {
        RobotOptions {
            config_path: None,
            motion_file: Some(motion.path().to_path_buf()),
            ports: vec!["/dev/ttyUSB0".to_string()],
        }
    }

    #[test]
    fn test_calls_before_initialize_fail() {
        let robot = Robot::new(SimConnector::new(20), RobotOptions::default());
        assert!(!robot.is_initialized());
        assert_eq!(robot.play_action(1), -1);
        assert_eq!(robot.check_actuators(), -1);
        assert_eq!(robot.read_battery_level(), -1);
        assert!(!robot.startup());
        assert!(robot.status().is_none());
    }

    #[test]
    fn test_initialize_seeds_positions() {
        let motion = motion_file();
        let connector = SimConnector::new(20);
        let bus = connector.bus();
        bus.set_position(5, 1500);

        let robot = Robot::new(connector, options(&motion));
        assert!(robot.initialize());
        assert_eq!(robot.port().as_deref(), Some("/dev/ttyUSB0"));

        let control = robot.control().unwrap();
        let state = control.core().lock();
        assert_eq!(state.positions.get(5), Some(1500));
        assert_eq!(state.ownership.enabled_for(ModuleId::Action).len(), 20);
        assert!(!state.powered);
        drop(state);
        assert_eq!(bus.target_writes(), 0);
    }

    #[test]
    fn test_missing_motion_file_leaves_robot_uninitialized() {
        let connector = SimConnector::new(20);
        let bus = connector.bus();
        let robot = Robot::new(
            connector,
            RobotOptions {
                motion_file: Some(PathBuf::from("/nonexistent/motion.bin")),
                ..RobotOptions::default()
            },
        );
        assert!(!robot.initialize());
        assert!(!robot.is_initialized());
        assert!(bus.events().is_empty());
    }

    #[test]
    fn test_play_and_diagnostics() {
        let motion = motion_file();
        let connector = SimConnector::new(20);
        let bus = connector.bus();
        let robot = Robot::new(connector, options(&motion));
        assert!(robot.initialize());

        assert_eq!(robot.play_action(1), 0);
        assert_eq!(bus.position(7), Some(2100));
        assert!(bus.events().contains(&BusEvent::Power(true)));

        assert_eq!(robot.play_action(99), -1);
        assert_eq!(robot.play_action(-3), -1);

        assert_eq!(robot.check_actuators(), 0);
        bus.set_failing(12, true);
        assert_eq!(robot.check_actuators(), 12);

        bus.set_voltage(118);
        assert_eq!(robot.read_battery_level(), 118);
    }

    #[test]
    fn test_direct_actuator_access() {
        let motion = motion_file();
        let connector = SimConnector::new(20);
        let bus = connector.bus();
        let robot = Robot::new(connector, options(&motion));
        assert!(robot.initialize());

        assert!(robot.set_actuator_target(19, 1800));
        assert_eq!(robot.get_actuator_target(19), 1800);
        assert_eq!(bus.position(19), Some(1800));

        assert!(!robot.set_actuator_target(21, 1800));
        assert!(!robot.set_actuator_target(3, 70000));
        assert_eq!(robot.get_actuator_target(0), -1);
    }

    #[test]
    fn test_walking_commands_need_walking() {
        let motion = motion_file();
        let robot = Robot::new(SimConnector::new(20), options(&motion));
        assert!(robot.initialize());

        assert!(!robot.walk_forward(10.0));
        assert!(!robot.set_velocity_from_joystick(0, -100));
    }
}
