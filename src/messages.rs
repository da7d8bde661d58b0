// Message types exchanged over the command bridge

use serde::{Deserialize, Serialize};

use crate::motion::{Amplitudes, GaitState, PlayerState, RobotMode, SchedulerStats};

// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum RobotCommand {
    Startup,
    Shutdown,
    PlayAction { page: i32 },
    PlayActionByName { name: String },
    Walk { on: bool },
    /// Raw joystick axes, centered at 0
    Joystick { x: i32, y: i32 },
    WalkForward { amount: f64 },
    WalkTurn { amount: f64 },
    SetActuator { id: i32, value: u16 },
    StopAction,
}

impl RobotCommand {
    /// Commands that keep the walking watchdog fed
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            RobotCommand::Joystick { .. }
                | RobotCommand::WalkForward { .. }
                | RobotCommand::WalkTurn { .. }
        )
    }
}

/// Status snapshot published by runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotStatus {
    pub mode: RobotMode,
    pub powered: bool,
    pub gait: GaitState,
    pub gait_phase: f64,
    pub amplitudes: Amplitudes,
    pub velocity_accumulator: f64,
    pub action: PlayerState,
    pub page: Option<usize>,
    pub stats: SchedulerStats,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}
