// Command bridge: zenoh in, robot calls out, status loop with watchdog
// Note: the watchdog only matters while walking. If the teleop stops sending
// velocity commands, the gait is brought back to a standstill instead of
// walking on with its last amplitudes.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{CMD_TIMEOUT, STATUS_HZ, TOPIC_CMD, TOPIC_HEALTH, TOPIC_STATUS};
use crate::messages::{RobotCommand, RuntimeHealth};
use crate::motion::RobotMode;
use crate::robot::Robot;

// Pending commands before the bridge starts dropping new ones
const COMMAND_QUEUE: usize = 64;

pub struct Watchdog {
    motion_received_at: Option<Instant>,
    zeroed: bool,
    health: RuntimeHealth,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            motion_received_at: None,
            zeroed: false,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Note an incoming command. Starting to walk arms the timer as well,
    /// so a fresh walk gets a full timeout before its first velocity command.
    pub fn on_command(&mut self, cmd: &RobotCommand, now: Instant) {
        if cmd.is_motion() || matches!(cmd, RobotCommand::Walk { on: true }) {
            self.motion_received_at = Some(now);
            self.zeroed = false;
        }
    }

    /// Returns the command to inject when motion commands went stale while walking
    pub fn check(&mut self, walking: bool, now: Instant) -> Option<RobotCommand> {
        let age = self
            .motion_received_at
            .map(|at| now.saturating_duration_since(at));

        match age {
            Some(age) if age <= CMD_TIMEOUT => {
                self.health = RuntimeHealth::Ok;
                None
            }
            _ => {
                if self.health != RuntimeHealth::CmdStale {
                    warn!("Command stale ({:?} old)", age.unwrap_or_default());
                }
                self.health = RuntimeHealth::CmdStale;
                if walking && !self.zeroed {
                    warn!("Stopping gait motion");
                    self.zeroed = true;
                    Some(RobotCommand::Joystick { x: 0, y: 0 })
                } else {
                    None
                }
            }
        }
    }
}

/// Apply one command to the robot, blocking until it completes
pub fn execute(robot: &Robot, cmd: RobotCommand) {
    debug!("Executing {:?}", cmd);
    let ok = match &cmd {
        RobotCommand::Startup => robot.startup(),
        RobotCommand::Shutdown => robot.shutdown(),
        RobotCommand::PlayAction { page } => robot.play_action(*page) == 0,
        RobotCommand::PlayActionByName { name } => robot.play_action_by_name(name) == 0,
        RobotCommand::Walk { on } => robot.set_walking(*on),
        RobotCommand::Joystick { x, y } => robot.set_velocity_from_joystick(*x, *y),
        RobotCommand::WalkForward { amount } => robot.walk_forward(*amount),
        RobotCommand::WalkTurn { amount } => robot.walk_turn(*amount),
        RobotCommand::SetActuator { id, value } => robot.set_actuator_target(*id, i32::from(*value)),
        RobotCommand::StopAction => {
            robot.stop_action();
            true
        }
    };
    if !ok {
        warn!("Command failed: {:?}", cmd);
    }
}

pub async fn run(robot: Arc<Robot>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_status = session.declare_publisher(TOPIC_STATUS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    // Commands run one at a time, in arrival order, off the async loop
    let (tx, mut rx) = mpsc::channel::<RobotCommand>(COMMAND_QUEUE);
    let worker_robot = Arc::clone(&robot);
    let worker = tokio::task::spawn_blocking(move || {
        while let Some(cmd) = rx.blocking_recv() {
            execute(&worker_robot, cmd);
        }
    });

    let mut watchdog = Watchdog::new();
    let mut tick = interval(Duration::from_millis(1000 / STATUS_HZ));

    info!(
        "Bridge started: {}Hz status, {}ms watchdog timeout",
        STATUS_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD);
    info!("Publishing to: {}, {}", TOPIC_STATUS, TOPIC_HEALTH);

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut interrupted => {
                info!("Interrupted, shutting down");
                break;
            }
        }

        // 1. Queue all pending commands (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<RobotCommand>(&payload) {
                Ok(cmd) => {
                    watchdog.on_command(&cmd, Instant::now());
                    if tx.try_send(cmd).is_err() {
                        warn!("Command queue full, dropping command");
                    }
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 2. Watchdog
        let status = robot.status();
        let walking = status.as_ref().is_some_and(|s| s.mode == RobotMode::Walking);
        if let Some(cmd) = watchdog.check(walking, Instant::now()) {
            if tx.try_send(cmd).is_err() {
                warn!("Command queue full, watchdog stop dropped");
            }
        }

        // 3. Publish status
        if let Some(status) = status {
            pub_status.put(serde_json::to_string(&status)?).await?;
        }

        // 4. Publish health
        let health_json = serde_json::to_string(&watchdog.health())?;
        pub_health.put(health_json).await?;
    }

    drop(tx);
    worker.await?;

    let shutdown_robot = Arc::clone(&robot);
    tokio::task::spawn_blocking(move || shutdown_robot.shutdown()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_motion_keeps_health_ok() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new();
        assert_eq!(watchdog.health(), RuntimeHealth::CmdStale);

        watchdog.on_command(&RobotCommand::Joystick { x: 0, y: -50 }, start);
        assert_eq!(watchdog.check(true, start + Duration::from_millis(100)), None);
        assert_eq!(watchdog.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_stale_walking_sends_one_stop() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new();
        watchdog.on_command(&RobotCommand::WalkForward { amount: 20.0 }, start);

        let late = start + CMD_TIMEOUT + Duration::from_millis(1);
        assert_eq!(
            watchdog.check(true, late),
            Some(RobotCommand::Joystick { x: 0, y: 0 })
        );
        assert_eq!(watchdog.health(), RuntimeHealth::CmdStale);
        assert_eq!(watchdog.check(true, late + Duration::from_millis(100)), None);

        // A new motion command re-arms it
        watchdog.on_command(&RobotCommand::WalkTurn { amount: 5.0 }, late);
        assert!(watchdog.check(true, late + CMD_TIMEOUT * 2).is_some());
    }

    #[test]
    fn test_walk_start_arms_the_timer() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new();
        watchdog.on_command(&RobotCommand::Walk { on: true }, start);

        assert_eq!(watchdog.check(true, start + Duration::from_millis(100)), None);
        assert_eq!(watchdog.health(), RuntimeHealth::Ok);

        // Still stops a walk that never gets a velocity command
        let late = start + CMD_TIMEOUT + Duration::from_millis(1);
        assert_eq!(
            watchdog.check(true, late),
            Some(RobotCommand::Joystick { x: 0, y: 0 })
        );
    }

    #[test]
    fn test_idle_robot_is_never_stopped() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new();
        watchdog.on_command(&RobotCommand::Walk { on: true }, start);
        assert_eq!(watchdog.check(false, start + CMD_TIMEOUT * 4), None);
        assert_eq!(watchdog.health(), RuntimeHealth::CmdStale);
    }
}
