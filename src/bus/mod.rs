// Actuator bus for the CM730 sub-controller and its MX28 joints
//
// Provides:
// - The `ActuatorBus` contract used by the scheduler and the control facade
// - A protocol 1.0 serial implementation (`Cm730Bus`)
// - An in-memory bus (`SimBus`) for simulation and tests
// - Port probing across the known device names

pub mod dynamixel;
pub mod sim;

use tracing::{info, warn};

pub use dynamixel::{Cm730Bus, SerialConnector};
pub use sim::{BusEvent, SimBus, SimConnector};

/// Id of the CM730 sub-controller on the bus
pub const CONTROLLER_ID: u8 = 200;

/// Broadcast id (no status packet is returned)
pub const BROADCAST_ID: u8 = 254;

/// Error types for actuator bus communication
///
/// The bus never retries; callers decide what a failure means.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("Timeout waiting for response from actuator {id}")]
    Timeout { id: u8 },

    #[error("Actuator {id} did not acknowledge: {reason}")]
    NotAcknowledged { id: u8, reason: String },

    #[error("Checksum mismatch for actuator {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Registers this runtime touches, on either the MX28 joints or the CM730
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    // MX28 control table
    ModelNumber,
    TorqueEnable,
    GoalPosition,
    PresentPosition,
    PresentVoltage,
    PresentTemperature,

    // CM730 control table
    ActuatorPower,
    ControllerVoltage,
}

impl Register {
    /// Control table address
    pub fn address(self) -> u8 {
        match self {
            Register::ModelNumber => 0,
            Register::TorqueEnable => 24,
            Register::GoalPosition => 30,
            Register::PresentPosition => 36,
            Register::PresentVoltage => 42,
            Register::PresentTemperature => 43,
            Register::ActuatorPower => 24,
            Register::ControllerVoltage => 50,
        }
    }

    /// Width in bytes (1 or 2, little-endian)
    pub fn width(self) -> u8 {
        match self {
            Register::ModelNumber | Register::GoalPosition | Register::PresentPosition => 2,
            _ => 1,
        }
    }
}

/// Synchronous register access to addressed actuators.
///
/// Implementations are single-writer: the caller must guarantee that two
/// threads never drive the same bus at once.
pub trait ActuatorBus: Send {
    /// Write a goal position (device units) to one actuator
    fn write_target(&mut self, id: u8, position: u16) -> Result<()> {
        self.write_register(id, Register::GoalPosition, position)
    }

    fn read_register(&mut self, id: u8, register: Register) -> Result<u16>;

    fn write_register(&mut self, id: u8, register: Register, value: u16) -> Result<()>;

    /// Check whether a device answers on this id
    fn ping(&mut self, id: u8) -> Result<bool>;

    /// Switch actuator power through the sub-controller
    fn set_power(&mut self, on: bool) -> Result<()> {
        self.write_register(CONTROLLER_ID, Register::ActuatorPower, on as u16)
    }
}

/// Opens a bus on a named port
pub trait BusConnector: Send + Sync {
    fn connect(&self, port: &str) -> Result<Box<dyn ActuatorBus>>;
}

/// Try each known port exactly once, in order.
///
/// A port counts as connected only when the sub-controller answers a ping.
/// Returns the first working bus, or the last error once every port failed.
pub fn connect_first(
    connector: &dyn BusConnector,
    ports: &[String],
) -> Result<(String, Box<dyn ActuatorBus>)> {
    let mut last_err = BusError::PortUnavailable {
        port: String::new(),
        reason: "no ports configured".to_string(),
    };

    for port in ports {
        info!("Probing actuator bus on {}", port);
        let mut bus = match connector.connect(port) {
            Ok(bus) => bus,
            Err(e) => {
                warn!("Could not open {}: {}", port, e);
                last_err = e;
                continue;
            }
        };

        match bus.ping(CONTROLLER_ID) {
            Ok(true) => {
                info!("Sub-controller responding on {}", port);
                return Ok((port.clone(), bus));
            }
            Ok(false) => {
                warn!("Sub-controller not responding on {}", port);
                last_err = BusError::Timeout { id: CONTROLLER_ID };
            }
            Err(e) => {
                warn!("Ping failed on {}: {}", port, e);
                last_err = e;
            }
        }
    }

    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_layout() {
        assert_eq!(Register::GoalPosition.address(), 30);
        assert_eq!(Register::GoalPosition.width(), 2);
        assert_eq!(Register::ControllerVoltage.address(), 50);
        assert_eq!(Register::ControllerVoltage.width(), 1);
    }

    #[test]
    fn test_connect_first_falls_back_to_second_port() {
        let connector = SimConnector::new(20).with_failing_port("/dev/ttyUSB0");
        let ports = vec!["/dev/ttyUSB0".to_string(), "/dev/ttyUSB1".to_string()];

        let (port, _bus) = connect_first(&connector, &ports).unwrap();
        assert_eq!(port, "/dev/ttyUSB1");
        assert_eq!(connector.attempts(), ports);
    }

    #[test]
    fn test_connect_first_tries_each_port_once() {
        let connector = SimConnector::new(20)
            .with_failing_port("/dev/ttyUSB0")
            .with_failing_port("/dev/ttyUSB1");
        let ports = vec!["/dev/ttyUSB0".to_string(), "/dev/ttyUSB1".to_string()];

        let err = connect_first(&connector, &ports).err().unwrap();
        assert!(matches!(err, BusError::PortUnavailable { ref port, .. } if port == "/dev/ttyUSB1"));
        assert_eq!(connector.attempts(), ports);
    }
}
