use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use biped_motion_runtime::bus::{SerialConnector, SimConnector};
use biped_motion_runtime::config::DEFAULT_CONFIG_PATH;
use biped_motion_runtime::motion::NUM_JOINTS;
use biped_motion_runtime::robot::{Robot, RobotOptions};

#[derive(Debug, Parser)]
#[command(about = "Motion runtime for a 20-joint humanoid, driven over zenoh")]
struct Args {
    /// Tuning file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Motion page file, overrides the config
    #[arg(long)]
    motion_file: Option<PathBuf>,

    /// Serial port to probe; repeat to probe several in order
    #[arg(long = "port")]
    ports: Vec<String>,

    /// Run against simulated actuators instead of the serial bus
    #[arg(long)]
    simulate: bool,

    /// Leave actuator power off after initialization
    #[arg(long)]
    no_startup: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init(); // installs the subscriber globally

    let args = Args::parse();

    // Fall back to the default tuning file only when it exists
    let config_path = args.config.or_else(|| {
        let default = Path::new(DEFAULT_CONFIG_PATH);
        default.exists().then(|| default.to_path_buf())
    });
    let options = RobotOptions {
        config_path,
        motion_file: args.motion_file,
        ports: args.ports,
    };

    let robot = if args.simulate {
        info!("Using simulated actuators");
        Robot::new(SimConnector::new(NUM_JOINTS), options)
    } else {
        Robot::new(SerialConnector::default(), options)
    };
    let robot = Arc::new(robot);

    let init_robot = Arc::clone(&robot);
    let initialized = tokio::task::spawn_blocking(move || {
        init_robot.initialize() && (args.no_startup || init_robot.startup())
    })
    .await
    .unwrap_or(false);
    if !initialized {
        eprintln!("Robot initialization failed");
        std::process::exit(1);
    }
    if args.no_startup {
        warn!("Actuator power left off");
    }

    if let Err(e) = biped_motion_runtime::runtime::run(robot).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
