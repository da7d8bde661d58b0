// CM730 serial bus, Dynamixel protocol 1.0
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// The CM730 forwards packets to the MX28 joints and answers for id 200 itself.

use serialport::{self, SerialPort};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

use super::{ActuatorBus, BROADCAST_ID, BusConnector, BusError, Register, Result};

/// Default serial configuration for the CM730
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 50;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// Serial connection to the CM730 sub-controller
pub struct Cm730Bus {
    port_name: String,
    port: Box<dyn SerialPort>,
}

impl Cm730Bus {
    /// Open a new connection to the sub-controller
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with(port_name, DEFAULT_BAUDRATE, Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }

    /// Open with custom baudrate and read timeout
    pub fn open_with(port_name: &str, baudrate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(timeout)
            .open()
            .map_err(|e| BusError::PortUnavailable {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            port_name: port_name.to_string(),
            port,
        })
    }

    /// Calculate checksum for a packet (excluding header)
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    /// Build a packet with header and checksum
    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // params + instruction + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);

        let checksum_data = &packet[2..]; // skip header
        packet.push(Self::checksum(checksum_data));

        packet
    }

    fn io_error(&self, id: u8, e: io::Error) -> BusError {
        if e.kind() == io::ErrorKind::TimedOut {
            BusError::Timeout { id }
        } else {
            BusError::PortUnavailable {
                port: self.port_name.clone(),
                reason: e.to_string(),
            }
        }
    }

    fn send_packet(&mut self, id: u8, packet: &[u8]) -> Result<()> {
        // Drop any stale bytes from an earlier timed-out exchange
        let _ = self.port.clear(serialport::ClearBuffer::Input);
        self.port
            .write_all(packet)
            .and_then(|_| self.port.flush())
            .map_err(|e| self.io_error(id, e))
    }

    fn read_exact(&mut self, id: u8, buf: &mut [u8]) -> Result<()> {
        self.port.read_exact(buf).map_err(|e| self.io_error(id, e))
    }

    /// Read a status packet and return its parameters
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.read_exact(expected_id, &mut header)?;

        if header != HEADER {
            return Err(BusError::NotAcknowledged {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.read_exact(expected_id, &mut id_length)?;
        let id = id_length[0];
        let length = id_length[1] as usize;

        if id != expected_id {
            return Err(BusError::NotAcknowledged {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        if length < 2 {
            return Err(BusError::NotAcknowledged {
                id,
                reason: format!("Status packet too short ({} bytes)", length),
            });
        }

        // error + params + checksum = length bytes
        let mut remaining = vec![0u8; length];
        self.read_exact(id, &mut remaining)?;

        let mut checksum_data = vec![id, length as u8];
        checksum_data.extend_from_slice(&remaining[..remaining.len() - 1]);
        if Self::checksum(&checksum_data) != remaining[remaining.len() - 1] {
            return Err(BusError::ChecksumMismatch { id });
        }

        let error_status = remaining[0];
        if error_status != 0 {
            return Err(BusError::NotAcknowledged {
                id,
                reason: format!("error status 0x{:02X}", error_status),
            });
        }

        Ok(remaining[1..remaining.len() - 1].to_vec())
    }
}

impl ActuatorBus for Cm730Bus {
    fn read_register(&mut self, id: u8, register: Register) -> Result<u16> {
        let width = register.width();
        let packet = Self::build_packet(id, Instruction::Read, &[register.address(), width]);
        self.send_packet(id, &packet)?;

        let response = self.read_response(id)?;
        match (width, response.as_slice()) {
            (1, [lo, ..]) => Ok(*lo as u16),
            (2, [lo, hi, ..]) => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(BusError::NotAcknowledged {
                id,
                reason: format!("Expected {} bytes, got {}", width, response.len()),
            }),
        }
    }

    fn write_register(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        let params: Vec<u8> = match register.width() {
            1 => vec![register.address(), (value & 0xFF) as u8],
            _ => vec![register.address(), (value & 0xFF) as u8, (value >> 8) as u8],
        };
        let packet = Self::build_packet(id, Instruction::Write, &params);
        debug!("Write to {}: reg={:?}, value={}", id, register, value);
        self.send_packet(id, &packet)?;

        if id == BROADCAST_ID {
            return Ok(());
        }
        let _ = self.read_response(id)?;
        Ok(())
    }

    fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = Self::build_packet(id, Instruction::Ping, &[]);
        self.send_packet(id, &packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(BusError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Opens `Cm730Bus` connections on real serial ports
#[derive(Debug, Clone)]
pub struct SerialConnector {
    pub baudrate: u32,
    pub timeout: Duration,
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self {
            baudrate: DEFAULT_BAUDRATE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl BusConnector for SerialConnector {
    fn connect(&self, port: &str) -> Result<Box<dyn ActuatorBus>> {
        Ok(Box::new(Cm730Bus::open_with(port, self.baudrate, self.timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // ID=1, Length=4, Instruction=WRITE, Addr=30, Data=0, 2
        let data = [1u8, 4, 0x03, 30, 0, 2];
        // ~(1+4+3+30+0+2) = ~40 = 215
        assert_eq!(Cm730Bus::checksum(&data), 215);
    }

    #[test]
    fn test_build_ping_packet() {
        let packet = Cm730Bus::build_packet(200, Instruction::Ping, &[]);
        assert_eq!(packet.len(), 6);
        assert_eq!(&packet[..2], &HEADER);
        assert_eq!(packet[2], 200);
        assert_eq!(packet[3], 2); // instruction + checksum
        assert_eq!(packet[4], 0x01);
        assert_eq!(packet[5], Cm730Bus::checksum(&[200, 2, 0x01]));
    }

    #[test]
    fn test_build_model_number_read_packet() {
        let register = Register::ModelNumber;
        let packet = Cm730Bus::build_packet(
            3,
            Instruction::Read,
            &[register.address(), register.width()],
        );
        assert_eq!(&packet[2..7], &[3, 4, 0x02, 0, 2]);
    }

    #[test]
    fn test_build_goal_position_packet() {
        let packet = Cm730Bus::build_packet(7, Instruction::Write, &[30, 0x00, 0x08]);
        assert_eq!(packet[3], 5);
        assert_eq!(&packet[4..8], &[0x03, 30, 0x00, 0x08]);
    }
}
