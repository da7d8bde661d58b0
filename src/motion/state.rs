// Shared motion state: modules, ownership and last commanded positions
//
// Everything here is mutated under one lock, so a tick always sees a
// complete ownership table and a consistent set of module states.

use serde::{Deserialize, Serialize};

use super::ModuleId;
use super::action::ActionPlayer;
use super::joint::{JointPositions, JointTargets};
use super::ownership::OwnershipTable;
use super::scheduler::SchedulerStats;
use super::walking::GaitController;

/// What the robot as a whole is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotMode {
    PoweredOff,
    Idle,
    ActionPlaying,
    Walking,
}

#[derive(Debug)]
pub struct MotionState {
    pub ownership: OwnershipTable,
    pub action: ActionPlayer,
    pub walking: GaitController,
    /// Last position commanded to each actuator, before calibration offsets
    pub positions: JointPositions,
    pub mode: RobotMode,
    pub powered: bool,
    pub scheduler_running: bool,
    pub stats: SchedulerStats,
}

impl MotionState {
    pub fn new(action: ActionPlayer, walking: GaitController) -> Self {
        Self {
            ownership: OwnershipTable::new(),
            action,
            walking,
            positions: JointPositions::default(),
            mode: RobotMode::PoweredOff,
            powered: false,
            scheduler_running: false,
            stats: SchedulerStats::default(),
        }
    }

    /// Run every active module once and merge their output.
    ///
    /// Each module only contributes the actuators it owns, so the merged set
    /// holds at most one target per actuator. Actuators nobody commands this
    /// tick are absent and keep their last goal.
    pub fn tick(&mut self) -> JointTargets {
        let mut merged = JointTargets::new();

        if self.action.is_running() {
            if let Some(targets) = self.action.tick(&self.positions) {
                self.merge(&mut merged, ModuleId::Action, targets);
            }
        }

        if self.walking.is_running() || !self.ownership.enabled_for(ModuleId::Walking).is_empty() {
            let targets = self.walking.tick();
            self.merge(&mut merged, ModuleId::Walking, targets);
        }

        self.positions.apply(&merged);
        merged
    }

    fn merge(&self, merged: &mut JointTargets, module: ModuleId, mut targets: JointTargets) {
        targets.retain(|id| self.ownership.is_owned_by(id, module));
        for (id, position) in targets.iter() {
            debug_assert!(merged.get(id).is_none(), "actuator {} commanded twice", id);
            merged.set(id, position);
        }
    }

    /// Modules that are currently producing motion
    pub fn is_module_active(&self, module: ModuleId) -> bool {
        match module {
            ModuleId::Action => self.action.is_running(),
            ModuleId::Walking => self.walking.is_running(),
        }
    }
}
