// Gait controller: phase-driven walking trajectory
//
// One gait cycle covers phase 0..1. The first half swings the right foot
// (left single support), the second half the left foot, with a double
// support window of `dsp_ratio` around phase 0 and 0.5. Every trajectory
// is zero at phase 0, so a cycle boundary is always the neutral stance.

use std::f64::consts::PI;
use std::time::Duration;

use tracing::{debug, info};

use super::joint::*;
use crate::config::WalkingConfig;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum GaitError {
    #[error("Invalid {axis} amplitude {value} (limit ±{limit})")]
    InvalidAmplitude {
        axis: &'static str,
        value: f64,
        limit: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GaitState {
    Stopped,
    Starting,
    Walking,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubPhase {
    DoubleSupport,
    LeftSupport,
    RightSupport,
}

/// Velocity intent: forward/lateral stride in mm, turn in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Amplitudes {
    pub forward: f64,
    pub lateral: f64,
    pub turn: f64,
}

/// Joint direction signs, indexed by actuator id
const DIRECTION: [f64; NUM_JOINTS as usize + 1] = [
    0.0, // unused
    1.0, -1.0, // shoulder pitch R/L
    1.0, 1.0, // shoulder roll R/L
    1.0, 1.0, // elbow R/L
    -1.0, -1.0, // hip yaw R/L
    -1.0, -1.0, // hip roll R/L
    1.0, -1.0, // hip pitch R/L
    1.0, -1.0, // knee R/L
    -1.0, 1.0, // ankle pitch R/L
    1.0, 1.0, // ankle roll R/L
    1.0, 1.0, // head
];

/// Fixed arm stance while walking (degrees)
const SHOULDER_ROLL_DEG: f64 = 17.0;
const ELBOW_DEG: f64 = 29.0;

/// Per-leg joint angles in degrees, before direction signs
#[derive(Debug, Clone, Copy, Default)]
struct LegAngles {
    hip_yaw: f64,
    hip_roll: f64,
    hip_pitch: f64,
    knee: f64,
    ankle_pitch: f64,
    ankle_roll: f64,
}

#[derive(Debug)]
pub struct GaitController {
    config: WalkingConfig,
    tick_period: Duration,
    state: GaitState,
    /// Ticks into the current cycle
    step: u32,
    commanded: Amplitudes,
    applied: Amplitudes,
    velocity_accumulator: f64,
    /// Stride gain in use, latched from the accumulator at cycle boundaries
    gain: f64,
    /// Stop requested before the ramp-up cycle finished
    ramping: bool,
}

impl GaitController {
    pub fn new(config: WalkingConfig, tick_period: Duration) -> Self {
        Self {
            config,
            tick_period,
            state: GaitState::Stopped,
            step: 0,
            commanded: Amplitudes::default(),
            applied: Amplitudes::default(),
            velocity_accumulator: 0.0,
            gain: 1.0,
            ramping: false,
        }
    }

    pub fn config(&self) -> &WalkingConfig {
        &self.config
    }

    /// Set the velocity intent. Takes effect at the next cycle boundary
    /// while walking; an invalid value leaves every amplitude unchanged.
    pub fn set_amplitudes(&mut self, forward: f64, lateral: f64, turn: f64) -> Result<(), GaitError> {
        check_amplitude("forward", forward, self.config.max_forward)?;
        check_amplitude("lateral", lateral, self.config.max_lateral)?;
        check_amplitude("turn", turn, self.config.max_turn)?;

        self.commanded = Amplitudes {
            forward,
            lateral,
            turn,
        };
        Ok(())
    }

    /// Commanded intent (may not be applied yet)
    pub fn amplitudes(&self) -> Amplitudes {
        self.commanded
    }

    /// Amplitudes the trajectory is currently using
    pub fn applied_amplitudes(&self) -> Amplitudes {
        self.applied
    }

    /// Add forward intent to the velocity accumulator, clamped to the
    /// configured limits. The stride picks it up at the next cycle boundary.
    pub fn accumulate_velocity(&mut self, intent: f64) -> f64 {
        if intent.is_finite() {
            self.velocity_accumulator = (self.velocity_accumulator + intent).clamp(
                self.config.lower_velocity_limit,
                self.config.upper_velocity_limit,
            );
        }
        self.velocity_accumulator
    }

    pub fn velocity_accumulator(&self) -> f64 {
        self.velocity_accumulator
    }

    /// Stride gain the trajectory is currently using
    pub fn stride_gain(&self) -> f64 {
        self.gain
    }

    pub fn reset_velocity_accumulator(&mut self) {
        self.velocity_accumulator = 0.0;
    }

    pub fn start(&mut self) {
        match self.state {
            GaitState::Stopped => {
                info!("Gait starting");
                self.state = GaitState::Starting;
                self.step = 0;
                self.applied = Amplitudes::default();
                self.gain = 1.0;
            }
            GaitState::Stopping => {
                debug!("Gait stop cancelled");
                self.state = if self.ramping {
                    GaitState::Starting
                } else {
                    GaitState::Walking
                };
                self.ramping = false;
            }
            GaitState::Starting | GaitState::Walking => {}
        }
    }

    /// Request a stop at the end of the current cycle
    pub fn stop(&mut self) {
        if matches!(self.state, GaitState::Starting | GaitState::Walking) {
            info!("Gait stopping at end of cycle");
            self.ramping = self.state == GaitState::Starting;
            self.state = GaitState::Stopping;
        }
    }

    pub fn is_running(&self) -> bool {
        self.state != GaitState::Stopped
    }

    pub fn state(&self) -> GaitState {
        self.state
    }

    /// Cycle progress in [0, 1)
    pub fn phase(&self) -> f64 {
        self.step as f64 / self.cycle_ticks() as f64
    }

    /// Number of ticks in one full cycle
    pub fn cycle_ticks(&self) -> u32 {
        (self.config.period_time_ms / self.tick_ms()).ceil().max(1.0) as u32
    }

    pub fn sub_phase(&self) -> SubPhase {
        let half_dsp = self.config.dsp_ratio / 2.0;
        let t = self.phase();
        if t < half_dsp || (t >= 0.5 - half_dsp && t < 0.5 + half_dsp) || t >= 1.0 - half_dsp {
            SubPhase::DoubleSupport
        } else if t < 0.5 {
            SubPhase::LeftSupport
        } else {
            SubPhase::RightSupport
        }
    }

    fn tick_ms(&self) -> f64 {
        self.tick_period.as_secs_f64() * 1000.0
    }

    /// Advance one tick and compute the joint targets for the new phase
    pub fn tick(&mut self) -> JointTargets {
        if self.state == GaitState::Stopped {
            return self.pose();
        }

        self.step += 1;
        if self.step >= self.cycle_ticks() {
            self.step = 0;
            self.on_cycle_boundary();
        }

        self.pose()
    }

    fn on_cycle_boundary(&mut self) {
        match self.state {
            GaitState::Starting => {
                debug!("Gait ramp-up complete");
                self.state = GaitState::Walking;
                self.applied = self.commanded;
                self.gain = 1.0 + self.velocity_accumulator;
            }
            GaitState::Walking => {
                self.applied = self.commanded;
                self.gain = 1.0 + self.velocity_accumulator;
            }
            GaitState::Stopping => {
                info!("Gait stopped");
                self.state = GaitState::Stopped;
                self.applied = Amplitudes::default();
                self.gain = 1.0;
                self.ramping = false;
            }
            GaitState::Stopped => {}
        }
    }

    /// Joint targets for the current phase and state
    fn pose(&self) -> JointTargets {
        let cfg = &self.config;
        let t = self.phase();
        let wave = (2.0 * PI * t).sin();

        let forward = (self.applied.forward * self.gain).clamp(-cfg.max_forward, cfg.max_forward);
        let foot_x = forward / 2.0 * wave;
        let foot_y = self.applied.lateral / 2.0 * wave;
        let yaw = self.applied.turn / 2.0 * wave;
        let sway = cfg.swing_right_left * wave;

        let lift_scale = match self.state {
            GaitState::Stopped => 0.0,
            GaitState::Starting => t,
            GaitState::Stopping if self.ramping => t,
            GaitState::Walking | GaitState::Stopping => 1.0,
        };
        let (lift_right, lift_left) = self.foot_lift(lift_scale);

        let right = self.leg(-foot_x, -foot_y, -yaw, sway, lift_right);
        let left = self.leg(foot_x, foot_y, yaw, sway, lift_left);

        let mut angles = [0.0; NUM_JOINTS as usize + 1];
        for (side, leg) in [(0u8, right), (1u8, left)] {
            angles[(ID_R_HIP_YAW + side) as usize] = leg.hip_yaw;
            angles[(ID_R_HIP_ROLL + side) as usize] = leg.hip_roll;
            angles[(ID_R_HIP_PITCH + side) as usize] = leg.hip_pitch;
            angles[(ID_R_KNEE + side) as usize] = leg.knee;
            angles[(ID_R_ANKLE_PITCH + side) as usize] = leg.ankle_pitch;
            angles[(ID_R_ANKLE_ROLL + side) as usize] = leg.ankle_roll;
        }

        // Arms swing against the opposite foot
        angles[ID_R_SHOULDER_PITCH as usize] = cfg.arm_swing_gain * self.mm_to_deg(foot_x);
        angles[ID_L_SHOULDER_PITCH as usize] = cfg.arm_swing_gain * self.mm_to_deg(-foot_x);
        angles[ID_R_SHOULDER_ROLL as usize] = -SHOULDER_ROLL_DEG;
        angles[ID_L_SHOULDER_ROLL as usize] = SHOULDER_ROLL_DEG;
        angles[ID_R_ELBOW as usize] = ELBOW_DEG;
        angles[ID_L_ELBOW as usize] = -ELBOW_DEG;

        body_joints()
            .map(|id| {
                let deg = angles[id as usize] * DIRECTION[id as usize];
                (id, angle_to_position(deg, 0))
            })
            .collect()
    }

    /// Swing foot height (mm) for the right and left foot
    fn foot_lift(&self, scale: f64) -> (f64, f64) {
        let half_dsp = self.config.dsp_ratio / 2.0;
        let swing_len = 0.5 - self.config.dsp_ratio;
        if swing_len <= 0.0 {
            return (0.0, 0.0);
        }

        let phase = self.phase();
        let lift = |start: f64| {
            let s = (phase - start) / swing_len;
            if (0.0..=1.0).contains(&s) {
                self.config.foot_height * (PI * s).sin() * scale
            } else {
                0.0
            }
        };
        (lift(half_dsp), lift(0.5 + half_dsp))
    }

    fn leg(&self, foot_x: f64, foot_y: f64, yaw: f64, sway: f64, lift: f64) -> LegAngles {
        let cfg = &self.config;
        let stride = self.mm_to_deg(foot_x);
        let lift = self.mm_to_deg(lift);
        let roll = self.mm_to_deg(sway + foot_y);

        LegAngles {
            hip_yaw: yaw,
            hip_roll: roll,
            hip_pitch: cfg.knee_bend / 2.0 + cfg.hip_pitch_offset + stride + lift,
            knee: cfg.knee_bend + 2.0 * lift,
            ankle_pitch: cfg.knee_bend / 2.0 - stride + lift,
            ankle_roll: -roll,
        }
    }

    /// Small-angle conversion of a foot displacement to a joint angle
    fn mm_to_deg(&self, mm: f64) -> f64 {
        (mm / self.config.leg_length.max(1.0)).to_degrees()
    }
}

fn check_amplitude(axis: &'static str, value: f64, limit: f64) -> Result<(), GaitError> {
    if value.is_finite() && value.abs() <= limit {
        Ok(())
    } else {
        Err(GaitError::InvalidAmplitude { axis, value, limit })
    }
}
