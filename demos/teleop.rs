// Keyboard teleop: WASD walk, Space toggle walking, 1-9 play page, P sit/power off, Q quit
use biped_motion_runtime::config::TOPIC_CMD;
use biped_motion_runtime::messages::RobotCommand;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

const STICK: i32 = 128; // joystick deflection per key press
const INPUT_TIMEOUT_MS: u64 = 150; // Recenter the stick after this much time with no input

type Publisher<'a> = zenoh::pubsub::Publisher<'a>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    info!("Controls: Space=walk on/off, WASD=steer, 1-9=play page, P=sit+power off, Q=quit");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn send(publisher: &Publisher<'_>, cmd: &RobotCommand) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(serde_json::to_string(cmd)?).await?;
    Ok(())
}

async fn run_teleop(publisher: &Publisher<'_>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut walking = false;

    // Persistent stick state
    let mut x = 0;
    let mut y = 0;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 50ms timeout (20Hz effective rate)
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Stick: forward is negative y, left is negative x
                    KeyCode::Char('w') if pressed => {
                        y = -STICK;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        y = STICK;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        x = -STICK;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        x = STICK;
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char(' ') if pressed => {
                        walking = !walking;
                        info!("Walking: {}", walking);
                        send(publisher, &RobotCommand::Walk { on: walking }).await?;
                    }

                    KeyCode::Char(c @ '1'..='9') if pressed => {
                        let page = c as i32 - '0' as i32;
                        walking = false;
                        info!("Play page {}", page);
                        send(publisher, &RobotCommand::PlayAction { page }).await?;
                    }

                    KeyCode::Char('p') if pressed => {
                        walking = false;
                        send(publisher, &RobotCommand::Shutdown).await?;
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Recenter if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            x = 0;
            y = 0;
        }

        // Stream the stick only while walking; the runtime watchdog covers gaps
        if walking {
            send(publisher, &RobotCommand::Joystick { x, y }).await?;
        }
    }

    Ok(())
}
