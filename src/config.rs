// Timeouts, topics, ports and the runtime tuning file
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::LoadError;
use crate::motion::joint::is_valid_joint;

// Motion scheduler period (one tick)
pub const TICK_PERIOD_MS: u64 = 8;

// Command timeout for the bridge watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(500);

// Status publish rate
pub const STATUS_HZ: u64 = 10;

// Zenoh topics
pub const TOPIC_CMD: &str = "robot/cmd"; // commands
pub const TOPIC_STATUS: &str = "robot/state/status"; // status snapshot
pub const TOPIC_HEALTH: &str = "robot/state/health"; // health status

// Serial ports the sub-controller may enumerate on, probed in order
pub const KNOWN_PORTS: [&str; 2] = ["/dev/ttyUSB0", "/dev/ttyUSB1"];

// Default resource locations
pub const DEFAULT_CONFIG_PATH: &str = "Data/config.toml";
pub const DEFAULT_MOTION_FILE: &str = "Data/motion_4096.bin";

// Well-known pages
pub const SIT_PAGE: usize = 15;
pub const WALK_READY_PAGE: usize = 8;

/// Runtime tuning, loaded once at initialize time
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RobotConfig {
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub walking: WalkingConfig,

    /// Calibration offsets in device units
    #[serde(default)]
    pub offsets: Vec<JointOffset>,

    #[serde(default)]
    pub pages: PagesConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    /// Probed in order, each exactly once
    pub ports: Vec<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            ports: KNOWN_PORTS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub period_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period_ms: TICK_PERIOD_MS,
        }
    }
}

impl SchedulerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(1))
    }
}

/// Gait tuning. Lengths in mm, angles in degrees.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WalkingConfig {
    pub period_time_ms: f64,
    pub dsp_ratio: f64,
    pub foot_height: f64,
    pub swing_right_left: f64,
    pub hip_pitch_offset: f64,
    pub knee_bend: f64,
    pub arm_swing_gain: f64,
    pub leg_length: f64,

    pub max_forward: f64,
    pub max_lateral: f64,
    pub max_turn: f64,

    /// Joystick axis magnitude treated as centered
    pub dead_band: i32,
    pub joystick_scale: f64,
    pub turn_gain: f64,
    pub forward_gain: f64,
    pub backward_gain: f64,

    pub lower_velocity_limit: f64,
    pub upper_velocity_limit: f64,
}

impl Default for WalkingConfig {
    fn default() -> Self {
        Self {
            period_time_ms: 600.0,
            dsp_ratio: 0.1,
            foot_height: 40.0,
            swing_right_left: 20.0,
            hip_pitch_offset: 13.0,
            knee_bend: 40.0,
            arm_swing_gain: 1.5,
            leg_length: 219.0,
            max_forward: 80.0,
            max_lateral: 60.0,
            max_turn: 60.0,
            dead_band: 6,
            joystick_scale: 256.0,
            turn_gain: 60.0,
            forward_gain: 70.0,
            backward_gain: 45.0,
            lower_velocity_limit: -0.5,
            upper_velocity_limit: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct JointOffset {
    pub id: u8,
    pub value: i16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PagesConfig {
    pub motion_file: PathBuf,
    pub sit_page: usize,
    pub walk_ready_page: usize,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            motion_file: PathBuf::from(DEFAULT_MOTION_FILE),
            sit_page: SIT_PAGE,
            walk_ready_page: WALK_READY_PAGE,
        }
    }
}

impl RobotConfig {
    /// Load a TOML tuning file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| LoadError::missing(path, &e))?;
        let config = Self::from_toml(&contents)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, LoadError> {
        let config: RobotConfig =
            toml::from_str(contents).map_err(|e| LoadError::CorruptFormat(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), LoadError> {
        if let Some(bad) = self.offsets.iter().find(|o| !is_valid_joint(o.id)) {
            return Err(LoadError::CorruptFormat(format!(
                "offset for unknown actuator {}",
                bad.id
            )));
        }
        let w = &self.walking;
        if w.period_time_ms <= 0.0 || !(0.0..0.5).contains(&w.dsp_ratio) {
            return Err(LoadError::CorruptFormat(
                "walking period must be positive and dsp_ratio in [0, 0.5)".to_string(),
            ));
        }
        if w.lower_velocity_limit > w.upper_velocity_limit {
            return Err(LoadError::CorruptFormat(
                "lower_velocity_limit exceeds upper_velocity_limit".to_string(),
            ));
        }
        Ok(())
    }

    /// Calibration offset for one actuator (0 if none configured)
    pub fn offset(&self, id: u8) -> i16 {
        self.offsets
            .iter()
            .find(|o| o.id == id)
            .map(|o| o.value)
            .unwrap_or(0)
    }
}
