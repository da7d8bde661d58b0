// Motion modules and the scheduler that drives them
//
// Provides:
// - Joint ids and device unit conversion
// - The joint ownership table arbitrating modules
// - Keyframe page playback (action player) and the page table format
// - The phase-driven gait controller
// - The fixed-period scheduler thread merging module output onto the bus

pub mod action;
pub mod joint;
pub mod ownership;
pub mod page;
pub mod scheduler;
pub mod state;
pub mod walking;

pub use action::{ActionError, ActionPlayer, PlayerState, Progress};
pub use joint::{JointPositions, JointTargets, NUM_JOINTS};
pub use ownership::{OwnershipConflict, OwnershipTable};
pub use page::{Page, PageTable, Step};
pub use scheduler::{MotionCore, MotionScheduler, SchedulerStats, SchedulerStopped};
pub use state::{MotionState, RobotMode};
pub use walking::{Amplitudes, GaitController, GaitError, GaitState, SubPhase};

use serde::{Deserialize, Serialize};

/// Motion modules that can own actuators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleId {
    Action,
    Walking,
}
