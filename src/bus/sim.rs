// In-memory actuator bus
//
// Stands in for the CM730 when running with `--simulate` and in tests.
// Goal positions are reached instantly. Every successful write and power
// switch is appended to an ordered event log.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::{ActuatorBus, BusConnector, BusError, CONTROLLER_ID, Register, Result};

/// Device-neutral position (center of the 0..4096 range)
const NEUTRAL: u16 = 2048;

/// One observable effect on the simulated bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Power(bool),
    Target { id: u8, position: u16 },
    Register { id: u8, address: u8, value: u16 },
}

#[derive(Debug)]
struct SimState {
    actuator_count: u8,
    positions: BTreeMap<u8, u16>,
    powered: bool,
    voltage: u8,
    failing: HashSet<u8>,
    events: Vec<BusEvent>,
}

/// Simulated bus. Clones share the same devices, so a test can keep a
/// handle while the runtime owns another.
#[derive(Debug, Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    pub fn new(actuator_count: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                actuator_count,
                positions: BTreeMap::new(),
                powered: false,
                voltage: 120,
                failing: HashSet::new(),
                events: Vec::new(),
            })),
        }
    }

    /// Make an actuator stop answering (reads/writes time out)
    pub fn set_failing(&self, id: u8, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(id);
        } else {
            state.failing.remove(&id);
        }
    }

    /// Controller supply voltage in 0.1 V units
    pub fn set_voltage(&self, voltage: u8) {
        self.state.lock().voltage = voltage;
    }

    /// Seed an actuator's present position
    pub fn set_position(&self, id: u8, position: u16) {
        self.state.lock().positions.insert(id, position);
    }

    pub fn position(&self, id: u8) -> Option<u16> {
        self.state.lock().positions.get(&id).copied()
    }

    pub fn is_powered(&self) -> bool {
        self.state.lock().powered
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Number of goal-position writes recorded so far
    pub fn target_writes(&self) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, BusEvent::Target { .. }))
            .count()
    }
}

impl SimState {
    fn check(&self, id: u8) -> Result<()> {
        let known = id == CONTROLLER_ID || (1..=self.actuator_count).contains(&id);
        if !known || self.failing.contains(&id) {
            return Err(BusError::Timeout { id });
        }
        Ok(())
    }
}

impl ActuatorBus for SimBus {
    fn read_register(&mut self, id: u8, register: Register) -> Result<u16> {
        let state = self.state.lock();
        state.check(id)?;

        let value = match register {
            Register::ModelNumber => 29,
            Register::TorqueEnable => state.powered as u16,
            Register::GoalPosition | Register::PresentPosition => {
                state.positions.get(&id).copied().unwrap_or(NEUTRAL)
            }
            Register::PresentVoltage | Register::ControllerVoltage => state.voltage as u16,
            Register::PresentTemperature => 35,
            Register::ActuatorPower => state.powered as u16,
        };
        Ok(value)
    }

    fn write_register(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        let mut state = self.state.lock();
        state.check(id)?;

        let event = match (id, register) {
            (CONTROLLER_ID, Register::ActuatorPower) => {
                state.powered = value != 0;
                BusEvent::Power(state.powered)
            }
            (_, Register::GoalPosition) => {
                state.positions.insert(id, value);
                BusEvent::Target { id, position: value }
            }
            _ => BusEvent::Register {
                id,
                address: register.address(),
                value,
            },
        };
        state.events.push(event);
        Ok(())
    }

    fn ping(&mut self, id: u8) -> Result<bool> {
        Ok(self.state.lock().check(id).is_ok())
    }
}

/// Hands out clones of one shared `SimBus`, failing the ports it is told to
#[derive(Debug)]
pub struct SimConnector {
    bus: SimBus,
    failing_ports: HashSet<String>,
    attempts: Mutex<Vec<String>>,
}

impl SimConnector {
    pub fn new(actuator_count: u8) -> Self {
        Self::with_bus(SimBus::new(actuator_count))
    }

    pub fn with_bus(bus: SimBus) -> Self {
        Self {
            bus,
            failing_ports: HashSet::new(),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failing_port(mut self, port: &str) -> Self {
        self.failing_ports.insert(port.to_string());
        self
    }

    /// Handle onto the devices every successful connection talks to
    pub fn bus(&self) -> SimBus {
        self.bus.clone()
    }

    /// Ports `connect` was called with, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }
}

impl BusConnector for SimConnector {
    fn connect(&self, port: &str) -> Result<Box<dyn ActuatorBus>> {
        self.attempts.lock().push(port.to_string());
        if self.failing_ports.contains(port) {
            return Err(BusError::PortUnavailable {
                port: port.to_string(),
                reason: "No such device".to_string(),
            });
        }
        Ok(Box::new(self.bus.clone()))
    }
}
