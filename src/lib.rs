pub mod bus;
pub mod config;
pub mod control;
pub mod error;
pub mod messages;
pub mod motion;
pub mod robot;
pub mod runtime;

pub use control::{ControlError, MotionControl};
pub use robot::{Robot, RobotOptions};
