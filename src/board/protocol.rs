// Command framing for the PiBorg-style I2C boards
//
// Every exchange is a write of [opcode, payload...] followed by a separate
// fixed-length read. The board echoes the opcode in byte 0 of the response;
// that echo is the only integrity check the protocol has.

use std::fmt;

use embedded_hal::i2c::I2c;
use tracing::debug;

use super::transport::BusProvider;

/// Opcode that asks any board for its device ID
pub const COMMAND_GET_ID: u8 = 0x99;
/// Opcode that moves a board to a new bus address (persisted in EEPROM)
pub const COMMAND_SET_I2C_ADD: u8 = 0xAA;

/// Direction selector bytes used by motor reads
pub const COMMAND_VALUE_FWD: u8 = 0x01;
pub const COMMAND_VALUE_REV: u8 = 0x02;

/// Flag bytes used by boolean settings
pub const COMMAND_VALUE_ON: u8 = 0x01;
pub const COMMAND_VALUE_OFF: u8 = 0x00;

/// Largest magnitude a motor power byte can carry
pub const POWER_MAX: i16 = 255;

/// Error types for board communication
#[derive(Debug, thiserror::Error)]
pub enum BorgError {
    #[error("{what} out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{board} has no resolved bus address")]
    NotInitialized { board: &'static str },

    #[error("No {board} found on bus {bus}")]
    NotFound { board: &'static str, bus: u8 },

    #[error("Could not open I2C bus {bus}: {reason}")]
    BusOpen { bus: u8, reason: String },

    #[error("Communication error with board at 0x{address:02X}: {reason}")]
    Communication { address: u8, reason: String },

    #[error("Board at 0x{address:02X} answered opcode 0x{actual:02X}, expected 0x{expected:02X}")]
    ProtocolMismatch { address: u8, expected: u8, actual: u8 },

    #[error("{board} does not support {operation}")]
    Unsupported {
        board: &'static str,
        operation: &'static str,
    },

    #[error("Address change to 0x{requested:02X} not confirmed (board found at {found:?})")]
    AddressUnconfirmed { requested: u8, found: Option<u8> },

    #[error("Settings belong to board 0x{expected:02X}, this board is at 0x{actual:02X}")]
    AddressMismatch { expected: u8, actual: u8 },

    #[error("{setting} not persisted: wrote {written}, board reports {stored}")]
    PersistenceUnverified {
        setting: &'static str,
        written: u16,
        stored: u16,
    },

    #[error("{setting} written but could not be read back: {reason}")]
    ReadbackFailed {
        setting: &'static str,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, BorgError>;

/// A legal 7-bit board address (0x04..=0x76)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoardAddress(u8);

impl BoardAddress {
    pub const MIN: u8 = 0x04;
    pub const MAX: u8 = 0x76;

    pub fn new(raw: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&raw) {
            Ok(Self(raw))
        } else {
            Err(BorgError::OutOfRange {
                what: "board address",
                value: raw as i64,
                min: Self::MIN as i64,
                max: Self::MAX as i64,
            })
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for BoardAddress {
    type Error = BorgError;

    fn try_from(raw: u8) -> Result<Self> {
        Self::new(raw)
    }
}

impl fmt::Display for BoardAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Motor direction, selected by the opcode variant rather than a sign bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Outbound frame: [opcode, payload...]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame(Vec<u8>);

impl CommandFrame {
    pub fn new(opcode: u8) -> Self {
        Self(vec![opcode])
    }

    pub fn with_byte(mut self, value: u8) -> Self {
        self.0.push(value);
        self
    }

    /// Append a 16-bit value, high byte first
    pub fn with_u16(mut self, value: u16) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn with_bytes(mut self, values: &[u8]) -> Self {
        self.0.extend_from_slice(values);
        self
    }

    pub fn opcode(&self) -> u8 {
        self.0[0]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Inbound frame whose echo byte has already been checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame(Vec<u8>);

impl ResponseFrame {
    /// Validate a raw response against the opcode that produced it
    pub fn parse(address: u8, opcode: u8, raw: Option<&[u8]>, frame_len: usize) -> Result<Self> {
        let raw = raw.ok_or_else(|| BorgError::Communication {
            address,
            reason: "no response".to_string(),
        })?;

        if raw.len() < frame_len || raw.len() < 3 {
            return Err(BorgError::Communication {
                address,
                reason: format!("Expected {} bytes, got {}", frame_len, raw.len()),
            });
        }

        if raw[0] != opcode {
            return Err(BorgError::ProtocolMismatch {
                address,
                expected: opcode,
                actual: raw[0],
            });
        }

        Ok(Self(raw[..frame_len].to_vec()))
    }

    pub fn byte(&self, index: usize) -> u8 {
        self.0[index]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Big-endian value in bytes 1 and 2
    pub fn word(&self) -> u16 {
        u16::from_be_bytes([self.0[1], self.0[2]])
    }

    pub fn flag(&self) -> bool {
        self.0[1] != COMMAND_VALUE_OFF
    }

    /// Direction byte plus magnitude byte, combined into a signed power level
    pub fn power(&self, address: u8) -> Result<i16> {
        decode_power(self.0[1], self.0[2]).ok_or_else(|| BorgError::Communication {
            address,
            reason: format!("Invalid direction byte 0x{:02X}", self.0[1]),
        })
    }
}

/// Reject power levels outside -255..=255 before anything reaches the bus
pub fn check_power(power: i16) -> Result<()> {
    if (-POWER_MAX..=POWER_MAX).contains(&power) {
        Ok(())
    } else {
        Err(BorgError::OutOfRange {
            what: "motor power",
            value: power as i64,
            min: -POWER_MAX as i64,
            max: POWER_MAX as i64,
        })
    }
}

/// Split a power level into direction and magnitude (zero counts as forward)
pub fn encode_power(power: i16) -> Result<(Direction, u8)> {
    check_power(power)?;
    let direction = if power >= 0 {
        Direction::Forward
    } else {
        Direction::Reverse
    };
    Ok((direction, power.unsigned_abs() as u8))
}

/// Inverse of `encode_power` for the bytes a motor read returns
pub fn decode_power(direction: u8, magnitude: u8) -> Option<i16> {
    match direction {
        COMMAND_VALUE_FWD => Some(magnitude as i16),
        COMMAND_VALUE_REV => Some(-(magnitude as i16)),
        _ => None,
    }
}

fn transport_error<E: embedded_hal::i2c::Error>(address: u8, err: E) -> BorgError {
    BorgError::Communication {
        address,
        reason: format!("{:?}", err.kind()),
    }
}

/// Write a frame to a device on an already opened bus
pub fn write_frame<I: I2c>(i2c: &mut I, address: u8, frame: &CommandFrame) -> Result<()> {
    debug!("-> 0x{:02X}: {:02X?}", address, frame.as_bytes());
    i2c.write(address, frame.as_bytes())
        .map_err(|e| transport_error(address, e))
}

/// Write a frame then read `frame_len` bytes back from the same device
pub fn query_frame<I: I2c>(
    i2c: &mut I,
    address: u8,
    frame: &CommandFrame,
    frame_len: usize,
) -> Result<Vec<u8>> {
    write_frame(i2c, address, frame)?;
    let mut response = vec![0u8; frame_len];
    i2c.read(address, &mut response)
        .map_err(|e| transport_error(address, e))?;
    debug!("<- 0x{:02X}: {:02X?}", address, response);
    Ok(response)
}

/// One bound device on one numbered bus.
///
/// Every call opens the bus and releases it before returning, so no handle
/// outlives a single transaction.
pub struct Link<'a, P: BusProvider> {
    pub provider: &'a P,
    pub bus: u8,
    pub address: u8,
    pub frame_len: usize,
}

impl<P: BusProvider> Link<'_, P> {
    /// Fire-and-forget write
    pub fn send(&self, frame: &CommandFrame) -> Result<()> {
        let mut i2c = self.provider.open(self.bus)?;
        write_frame(&mut i2c, self.address, frame)
    }

    /// Write, read the board's fixed-length frame and check the echo byte
    pub fn query(&self, frame: &CommandFrame) -> Result<ResponseFrame> {
        let mut i2c = self.provider.open(self.bus)?;
        let raw = query_frame(&mut i2c, self.address, frame, self.frame_len)?;
        ResponseFrame::parse(self.address, frame.opcode(), Some(&raw), self.frame_len)
    }
}
