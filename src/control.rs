// Control facade: safe sequencing of power, pages and walking
//
// Every operation here runs on a control thread and talks to the scheduler
// only through the shared motion state. Ownership hand-overs happen under
// the state lock, so a tick sees either the old or the new owner set.

use parking_lot::{MutexGuard, ReentrantMutex};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bus::{BusError, CONTROLLER_ID, Register};
use crate::config::{PagesConfig, WalkingConfig};
use crate::messages::RobotStatus;
use crate::motion::joint::{all_joints, body_joints, is_valid_joint};
use crate::motion::{
    ActionError, GaitError, GaitState, ModuleId, MotionCore, MotionState, RobotMode,
    SchedulerStopped,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Gait(#[from] GaitError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerStopped),

    #[error("Robot is not walking")]
    NotWalking,

    #[error("Actuator {0} does not exist")]
    UnknownActuator(i32),

    #[error("No page named {0:?}")]
    UnknownPage(String),
}

pub type Result<T> = std::result::Result<T, ControlError>;

/// Gait intent derived from a joystick reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoystickIntent {
    pub forward: f64,
    pub turn: f64,
    /// Normalized forward input fed to the velocity accumulator
    pub velocity: f64,
}

/// Map raw joystick axes to gait amplitudes.
///
/// Each axis is negated, then dead-banded on its own: magnitudes at or
/// below the dead-band give exactly zero, larger ones are shifted toward
/// zero by the dead-band so the output starts from zero without a jump.
pub fn joystick_intent(x: i32, y: i32, cfg: &WalkingConfig) -> JoystickIntent {
    let axis = |v: i32| {
        let v = -(v as i64);
        let db = cfg.dead_band.max(0) as i64;
        if v.abs() <= db {
            0.0
        } else {
            (v.signum() * (v.abs() - db)) as f64 / cfg.joystick_scale
        }
    };
    let xd = axis(x);
    let yd = axis(y);

    let forward = if yd < 0.0 {
        cfg.backward_gain * yd
    } else {
        cfg.forward_gain * yd
    };

    JoystickIntent {
        forward,
        turn: cfg.turn_gain * xd,
        velocity: yd,
    }
}

/// Top-level motion operations for one robot
pub struct MotionControl {
    core: Arc<MotionCore>,
    pages: PagesConfig,
    walking: WalkingConfig,
    /// Serializes multi-step sequences (power-down, page play, walk toggles)
    sequence: ReentrantMutex<()>,
}

impl MotionControl {
    pub fn new(core: Arc<MotionCore>, pages: PagesConfig, walking: WalkingConfig) -> Self {
        Self {
            core,
            pages,
            walking,
            sequence: ReentrantMutex::new(()),
        }
    }

    pub fn core(&self) -> &Arc<MotionCore> {
        &self.core
    }

    pub fn mode(&self) -> RobotMode {
        self.core.lock().mode
    }

    /// Switch actuator power on
    pub fn power_up(&self) -> Result<()> {
        let mut state = self.core.lock();
        if state.powered {
            return Ok(());
        }
        self.core.with_bus(|bus| bus.set_power(true))?;
        state.powered = true;
        if state.mode == RobotMode::PoweredOff {
            state.mode = RobotMode::Idle;
        }
        info!("Actuator power on");
        Ok(())
    }

    /// Stop walking, sit down, then cut actuator power.
    ///
    /// Power is only cut once the sit page has completed; if sitting fails
    /// the robot stays powered.
    pub fn power_down(&self) -> Result<()> {
        let _seq = self.sequence.lock();
        self.set_walking(false)?;
        self.play_action(self.pages.sit_page)?;

        let mut state = self.core.lock();
        self.core.wait_until(&mut state, |s| !s.action.is_running())?;
        self.core.with_bus(|bus| bus.set_power(false))?;
        state.powered = false;
        state.mode = RobotMode::PoweredOff;
        info!("Actuator power off");
        Ok(())
    }

    /// Play a page to completion, stopping the gait first if needed.
    ///
    /// Blocks until the page (and any page it chains to) has finished.
    pub fn play_action(&self, page: usize) -> Result<()> {
        if self.core.lock().action.pages().page(page).is_none() {
            return Err(ActionError::InvalidPage { index: page }.into());
        }

        let _seq = self.sequence.lock();
        self.power_up()?;
        self.stop_walking()?;

        let mut state = self.core.lock();
        self.core.wait_until(&mut state, |s| !s.action.is_running())?;
        // Action takes every actuator exclusively
        transfer(&mut state, ModuleId::Walking, ModuleId::Action, all_joints());
        state.action.start(page)?;
        state.mode = RobotMode::ActionPlaying;

        let finished = self.core.wait_until(&mut state, |s| !s.action.is_running());
        if state.mode == RobotMode::ActionPlaying {
            state.mode = RobotMode::Idle;
        }
        finished?;
        Ok(())
    }

    /// Play a page by name
    pub fn play_action_by_name(&self, name: &str) -> Result<usize> {
        let index = self
            .core
            .lock()
            .action
            .pages()
            .page_index(name)
            .ok_or_else(|| ControlError::UnknownPage(name.to_string()))?;
        self.play_action(index)?;
        Ok(index)
    }

    /// Abandon the running page immediately and release its actuators
    pub fn stop_action(&self) {
        let mut state = self.core.lock();
        state.action.stop();
        state.ownership.release_all(ModuleId::Action);
        if state.mode == RobotMode::ActionPlaying {
            state.mode = RobotMode::Idle;
        }
        drop(state);
        self.core.notify();
    }

    /// Start or stop walking
    pub fn set_walking(&self, on: bool) -> Result<()> {
        let _seq = self.sequence.lock();
        if on {
            self.start_walking()
        } else {
            self.stop_walking()
        }
    }

    fn start_walking(&self) -> Result<()> {
        {
            let state = self.core.lock();
            if state.mode == RobotMode::Walking && state.walking.state() != GaitState::Stopping {
                return Ok(());
            }
        }

        self.power_up()?;
        self.play_action(self.pages.walk_ready_page)?;

        let mut state = self.core.lock();
        transfer(&mut state, ModuleId::Action, ModuleId::Walking, body_joints());
        state.walking.set_amplitudes(0.0, 0.0, 0.0)?;
        state.walking.reset_velocity_accumulator();
        state.walking.start();
        state.mode = RobotMode::Walking;
        info!("Walking started");
        Ok(())
    }

    /// Let the gait finish its cycle, then give the body back to the action player
    fn stop_walking(&self) -> Result<()> {
        let mut state = self.core.lock();
        if state.walking.is_running() {
            state.walking.stop();
            self.core.wait_until(&mut state, |s| !s.walking.is_running())?;
            info!("Walking stopped");
        }
        if !state.ownership.enabled_for(ModuleId::Walking).is_empty() {
            transfer(&mut state, ModuleId::Walking, ModuleId::Action, body_joints());
        }
        if state.mode == RobotMode::Walking {
            state.mode = RobotMode::Idle;
        }
        Ok(())
    }

    fn walking_state(&self) -> Result<MutexGuard<'_, MotionState>> {
        let state = self.core.lock();
        if state.mode != RobotMode::Walking {
            return Err(ControlError::NotWalking);
        }
        Ok(state)
    }

    /// Set all three gait amplitudes
    pub fn set_velocity(&self, forward: f64, lateral: f64, turn: f64) -> Result<()> {
        let mut state = self.walking_state()?;
        state.walking.set_amplitudes(forward, lateral, turn)?;
        Ok(())
    }

    /// Drive the gait from joystick axes (dead-banded, accumulated)
    pub fn set_velocity_from_joystick(&self, x: i32, y: i32) -> Result<()> {
        let intent = joystick_intent(x, y, &self.walking);
        let mut state = self.walking_state()?;
        let lateral = state.walking.amplitudes().lateral;
        state
            .walking
            .set_amplitudes(intent.forward, lateral, intent.turn)?;
        if intent.velocity != 0.0 {
            state.walking.accumulate_velocity(intent.velocity);
        }
        Ok(())
    }

    /// Set the forward amplitude, keeping lateral and turn
    pub fn walk_forward(&self, amount: f64) -> Result<()> {
        let mut state = self.walking_state()?;
        let current = state.walking.amplitudes();
        state
            .walking
            .set_amplitudes(amount, current.lateral, current.turn)?;
        Ok(())
    }

    /// Set the turn amplitude, keeping forward and lateral
    pub fn walk_turn(&self, amount: f64) -> Result<()> {
        let mut state = self.walking_state()?;
        let current = state.walking.amplitudes();
        state
            .walking
            .set_amplitudes(current.forward, current.lateral, amount)?;
        Ok(())
    }

    /// Ping every actuator; returns the first id that does not answer
    pub fn check_actuators(&self) -> Result<Option<u8>> {
        let _state = self.core.lock();
        self.core.with_bus(|bus| {
            for id in all_joints() {
                if !bus.ping(id)? {
                    warn!("Actuator {} not responding", id);
                    return Ok(Some(id));
                }
            }
            Ok(None)
        })
    }

    /// Controller supply voltage in 0.1 V units
    pub fn battery_level(&self) -> Result<u16> {
        let _state = self.core.lock();
        let level = self
            .core
            .with_bus(|bus| bus.read_register(CONTROLLER_ID, Register::ControllerVoltage))?;
        Ok(level)
    }

    /// Write a raw goal position directly, bypassing ownership.
    ///
    /// Returns the module that owns the actuator and is actively driving it,
    /// if any: that module will overwrite this value on its next tick.
    pub fn set_actuator_target(&self, id: i32, value: u16) -> Result<Option<ModuleId>> {
        let id = checked_joint(id)?;
        let mut state = self.core.lock();
        self.core.with_bus(|bus| bus.write_target(id, value))?;
        let logical = self.core.remove_offset(id, value);
        state.positions.set(id, logical);

        let contender = state
            .ownership
            .owner_of(id)
            .filter(|&owner| state.is_module_active(owner));
        if let Some(owner) = contender {
            warn!("Direct write to actuator {} while {:?} drives it", id, owner);
        }
        Ok(contender)
    }

    /// Read the raw goal position of one actuator
    pub fn actuator_target(&self, id: i32) -> Result<u16> {
        let id = checked_joint(id)?;
        let _state = self.core.lock();
        let value = self
            .core
            .with_bus(|bus| bus.read_register(id, Register::GoalPosition))?;
        Ok(value)
    }

    pub fn status(&self) -> RobotStatus {
        let state = self.core.lock();
        RobotStatus {
            mode: state.mode,
            powered: state.powered,
            gait: state.walking.state(),
            gait_phase: state.walking.phase(),
            amplitudes: state.walking.amplitudes(),
            velocity_accumulator: state.walking.velocity_accumulator(),
            action: state.action.state(),
            page: state.action.progress().map(|p| p.page),
            stats: state.stats,
        }
    }
}

fn checked_joint(id: i32) -> Result<u8> {
    match u8::try_from(id) {
        Ok(id) if is_valid_joint(id) => Ok(id),
        _ => Err(ControlError::UnknownActuator(id)),
    }
}

/// Move actuators between modules. A conflict means the sequencing above is
/// wrong, which is not recoverable.
fn transfer(
    state: &mut MotionState,
    from: ModuleId,
    to: ModuleId,
    ids: impl IntoIterator<Item = u8>,
) {
    if let Err(conflict) = state.ownership.hand_over(from, to, ids) {
        panic!("joint ownership invariant violated: {}", conflict);
    }
    debug!(
        "Actuators handed from {:?} to {:?}: {} now owned by {:?}",
        from,
        to,
        state.ownership.enabled_for(to).len(),
        to
    );
}
