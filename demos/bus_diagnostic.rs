// Bus diagnostic: READ-ONLY check of the sub-controller and every joint
//
// This tool does NOT write anything to the actuators and never powers them.
//
// Usage: cargo run --example bus_diagnostic -- [port]
// Example: cargo run --example bus_diagnostic -- /dev/ttyUSB0

use biped_motion_runtime::bus::{ActuatorBus, Cm730Bus, Register, CONTROLLER_ID};
use biped_motion_runtime::config::KNOWN_PORTS;
use biped_motion_runtime::motion::joint::{all_joints, position_to_angle};

const JOINT_NAMES: [&str; 20] = [
    "R shoulder pitch",
    "L shoulder pitch",
    "R shoulder roll",
    "L shoulder roll",
    "R elbow",
    "L elbow",
    "R hip yaw",
    "L hip yaw",
    "R hip roll",
    "L hip roll",
    "R hip pitch",
    "L hip pitch",
    "R knee",
    "L knee",
    "R ankle pitch",
    "L ankle pitch",
    "R ankle roll",
    "L ankle roll",
    "Head pan",
    "Head tilt",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    // Get port from args or use the first known port
    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| KNOWN_PORTS[0].to_string());

    println!("Bus diagnostic (READ-ONLY)");
    println!("Serial port: {}", port);
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match Cm730Bus::open(&port) {
        Ok(bus) => {
            println!("  ✓ Serial port opened");
            bus
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct (known: {:?})", KNOWN_PORTS);
            println!("  - Verify the USB cable is connected");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Sub-controller (ID {})...", CONTROLLER_ID);
    match bus.ping(CONTROLLER_ID) {
        Ok(true) => println!("  ✓ RESPONDING"),
        Ok(false) => println!("  ✗ NO RESPONSE"),
        Err(e) => println!("  ✗ ERROR: {}", e),
    }
    match bus.read_register(CONTROLLER_ID, Register::ControllerVoltage) {
        Ok(v) => println!("  Supply voltage: {:.1} V", v as f64 / 10.0),
        Err(e) => println!("  Supply voltage: ERROR - {}", e),
    }
    match bus.read_register(CONTROLLER_ID, Register::ActuatorPower) {
        Ok(v) => println!("  Actuator power: {}", if v != 0 { "ON" } else { "OFF" }),
        Err(e) => println!("  Actuator power: ERROR - {}", e),
    }
    println!();

    println!("Step 3: Joints...");
    let mut missing = Vec::new();
    for id in all_joints() {
        let name = JOINT_NAMES[id as usize - 1];
        match bus.ping(id) {
            Ok(true) => {}
            Ok(false) => {
                println!("  {:>2} {:<17} ✗ NO RESPONSE", id, name);
                missing.push(id);
                continue;
            }
            Err(e) => {
                println!("  {:>2} {:<17} ✗ ERROR: {}", id, name, e);
                missing.push(id);
                continue;
            }
        }

        let model = bus.read_register(id, Register::ModelNumber);
        let position = bus.read_register(id, Register::PresentPosition);
        let temperature = bus.read_register(id, Register::PresentTemperature);
        let voltage = bus.read_register(id, Register::PresentVoltage);
        match (model, position, temperature, voltage) {
            (Ok(m), Ok(p), Ok(t), Ok(v)) => println!(
                "  {:>2} {:<17} ✓ model {:>3}  pos {:>4} ({:>7.2}°)  {:>2}°C  {:.1} V",
                id,
                name,
                m,
                p,
                position_to_angle(p, 0),
                t,
                v as f64 / 10.0
            ),
            (m, p, t, v) => println!(
                "  {:>2} {:<17} ⚠ partial read: model {:?} pos {:?} temp {:?} volt {:?}",
                id,
                name,
                m.ok(),
                p.ok(),
                t.ok(),
                v.ok()
            ),
        }
    }
    println!();

    if missing.is_empty() {
        println!("All 20 joints responding.");
    } else {
        println!("⚠ Not responding: {:?}", missing);
        println!("  - Check actuator power (the sub-controller switches it)");
        println!("  - Check the daisy-chain cabling around those joints");
    }

    Ok(())
}
