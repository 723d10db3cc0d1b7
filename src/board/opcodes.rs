// Opcode tables for each supported board
//
// Opcodes are small integers assigned per board; the same logical operation
// lands on a different byte on each board type, and some boards simply do not
// have it.

use super::calibration::CalibrationState;
use super::protocol::{BorgError, Direction, Result};
use super::sensor::{FilterMode, SensorThrottle};

/// Logical operations a board may implement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SetMotor { channel: u8, direction: Direction },
    GetMotor { channel: u8 },
    SetAllMotors { direction: Direction },
    AllOff,
    SetFailsafe,
    GetFailsafe,
    // Single on/off LED (ZeroBorg)
    SetLed,
    GetLed,
    // RGB LEDs (ThunderBorg)
    SetLedColour { led: u8 },
    GetLedColour { led: u8 },
    SetLeds,
    SetBatteryMonitor,
    GetBatteryMonitor,
    GetBatteryVoltage,
    SetBatteryLimits,
    GetBatteryLimits,
    GetDriveFault { channel: u8 },
    ResetEpo,
    GetEpo,
    SetEpoIgnore,
    GetEpoIgnore,
    GetNewIr,
    SetIrLed,
    GetIrLed,
    GetAnalog { channel: u8 },
    // Servo/ultrasonic (UltraBorg)
    SetServo { channel: u8 },
    GetServo { channel: u8 },
    CalibrateServo { channel: u8 },
    SetServoBoundary { channel: u8, boundary: ServoBoundary },
    GetServoBoundary { channel: u8, boundary: ServoBoundary },
    GetDistance { channel: u8, mode: FilterMode },
}

impl Operation {
    /// Short name used in `Unsupported` errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SetMotor { .. } => "set motor",
            Operation::GetMotor { .. } => "get motor",
            Operation::SetAllMotors { .. } => "set all motors",
            Operation::AllOff => "all off",
            Operation::SetFailsafe => "set failsafe",
            Operation::GetFailsafe => "get failsafe",
            Operation::SetLed => "set LED",
            Operation::GetLed => "get LED",
            Operation::SetLedColour { .. } => "set LED colour",
            Operation::GetLedColour { .. } => "get LED colour",
            Operation::SetLeds => "set LEDs",
            Operation::SetBatteryMonitor => "set battery LED monitor",
            Operation::GetBatteryMonitor => "get battery LED monitor",
            Operation::GetBatteryVoltage => "get battery voltage",
            Operation::SetBatteryLimits => "set battery limits",
            Operation::GetBatteryLimits => "get battery limits",
            Operation::GetDriveFault { .. } => "get drive fault",
            Operation::ResetEpo => "reset EPO",
            Operation::GetEpo => "get EPO",
            Operation::SetEpoIgnore => "set EPO ignore",
            Operation::GetEpoIgnore => "get EPO ignore",
            Operation::GetNewIr => "get new IR message",
            Operation::SetIrLed => "set IR LED",
            Operation::GetIrLed => "get IR LED",
            Operation::GetAnalog { .. } => "get analog",
            Operation::SetServo { .. } => "set servo",
            Operation::GetServo { .. } => "get servo",
            Operation::CalibrateServo { .. } => "calibrate servo",
            Operation::SetServoBoundary { .. } => "set servo boundary",
            Operation::GetServoBoundary { .. } => "get servo boundary",
            Operation::GetDistance { .. } => "get distance",
        }
    }
}

/// Which stored PWM limit a servo calibration call addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoBoundary {
    Minimum,
    Maximum,
    Boot,
}

impl ServoBoundary {
    fn index(self) -> u8 {
        match self {
            ServoBoundary::Minimum => 0,
            ServoBoundary::Maximum => 1,
            ServoBoundary::Boot => 2,
        }
    }
}

/// Static description of one board type
#[derive(Debug)]
pub struct OpcodeTable {
    pub name: &'static str,
    pub device_id: u8,
    pub frame_len: usize,
    /// Number of motor (or servo/sensor) channels, numbered from 1
    pub channels: u8,
    lookup: fn(Operation) -> Option<u8>,
}

impl OpcodeTable {
    pub fn opcode(&self, op: Operation) -> Result<u8> {
        (self.lookup)(op).ok_or(BorgError::Unsupported {
            board: self.name,
            operation: op.name(),
        })
    }

    pub fn supports(&self, op: Operation) -> bool {
        (self.lookup)(op).is_some()
    }

    /// Validate a 1-based channel number before it is used to pick an opcode
    pub fn check_channel(&self, channel: u8) -> Result<()> {
        if (1..=self.channels).contains(&channel) {
            Ok(())
        } else {
            Err(BorgError::OutOfRange {
                what: "channel",
                value: channel as i64,
                min: 1,
                max: self.channels as i64,
            })
        }
    }
}

/// Marker for a board type: its opcode table plus any per-board cached state
pub trait BoardKind {
    const TABLE: &'static OpcodeTable;
    type Cache: Default;
}

/// Dual 5 A motor controller with RGB LEDs and battery monitoring
pub struct ThunderBorg;
/// Quad motor controller with EPO input, IR receiver and analog inputs
pub struct ZeroBorg;
/// Dual high-power motor controller
pub struct Diabolo;
/// Four servo outputs plus four ultrasonic distance inputs
pub struct UltraBorg;

/// Cached state kept by an UltraBorg between calls
#[derive(Debug, Default)]
pub struct UltraBorgCache {
    pub calibration: CalibrationState,
    pub sensors: SensorThrottle,
}

impl BoardKind for ThunderBorg {
    const TABLE: &'static OpcodeTable = &THUNDERBORG;
    type Cache = ();
}

impl BoardKind for ZeroBorg {
    const TABLE: &'static OpcodeTable = &ZEROBORG;
    type Cache = ();
}

impl BoardKind for Diabolo {
    const TABLE: &'static OpcodeTable = &DIABOLO;
    type Cache = ();
}

impl BoardKind for UltraBorg {
    const TABLE: &'static OpcodeTable = &ULTRABORG;
    type Cache = UltraBorgCache;
}

pub static THUNDERBORG: OpcodeTable = OpcodeTable {
    name: "ThunderBorg",
    device_id: 0x15,
    frame_len: 6,
    channels: 2,
    lookup: thunderborg_opcode,
};

pub static ZEROBORG: OpcodeTable = OpcodeTable {
    name: "ZeroBorg",
    device_id: 0x40,
    frame_len: 4,
    channels: 4,
    lookup: zeroborg_opcode,
};

pub static DIABOLO: OpcodeTable = OpcodeTable {
    name: "Diabolo",
    device_id: 0x37,
    frame_len: 4,
    channels: 2,
    lookup: diabolo_opcode,
};

pub static ULTRABORG: OpcodeTable = OpcodeTable {
    name: "UltraBorg",
    device_id: 0x36,
    frame_len: 4,
    channels: 4,
    lookup: ultraborg_opcode,
};

fn thunderborg_opcode(op: Operation) -> Option<u8> {
    use Direction::{Forward, Reverse};

    let opcode = match op {
        Operation::SetLedColour { led: 1 } => 0x01,
        Operation::GetLedColour { led: 1 } => 0x02,
        Operation::SetLedColour { led: 2 } => 0x03,
        Operation::GetLedColour { led: 2 } => 0x04,
        Operation::SetLeds => 0x05,
        Operation::SetBatteryMonitor => 0x06,
        Operation::GetBatteryMonitor => 0x07,
        Operation::SetMotor { channel: 1, direction: Forward } => 0x08,
        Operation::SetMotor { channel: 1, direction: Reverse } => 0x09,
        Operation::GetMotor { channel: 1 } => 0x0A,
        Operation::SetMotor { channel: 2, direction: Forward } => 0x0B,
        Operation::SetMotor { channel: 2, direction: Reverse } => 0x0C,
        Operation::GetMotor { channel: 2 } => 0x0D,
        Operation::AllOff => 0x0E,
        Operation::GetDriveFault { channel: 1 } => 0x0F,
        Operation::GetDriveFault { channel: 2 } => 0x10,
        Operation::SetAllMotors { direction: Forward } => 0x11,
        Operation::SetAllMotors { direction: Reverse } => 0x12,
        Operation::SetFailsafe => 0x13,
        Operation::GetFailsafe => 0x14,
        Operation::GetBatteryVoltage => 0x15,
        Operation::SetBatteryLimits => 0x16,
        Operation::GetBatteryLimits => 0x17,
        _ => return None,
    };
    Some(opcode)
}

fn zeroborg_opcode(op: Operation) -> Option<u8> {
    let opcode = match op {
        Operation::SetLed => 0x01,
        Operation::GetLed => 0x02,
        // A..D occupy three consecutive opcodes each: fwd, rev, get
        Operation::SetMotor { channel, direction } if (1..=4).contains(&channel) => {
            let base = 0x03 + (channel - 1) * 3;
            match direction {
                Direction::Forward => base,
                Direction::Reverse => base + 1,
            }
        }
        Operation::GetMotor { channel } if (1..=4).contains(&channel) => 0x05 + (channel - 1) * 3,
        Operation::AllOff => 0x0F,
        Operation::SetAllMotors { direction: Direction::Forward } => 0x10,
        Operation::SetAllMotors { direction: Direction::Reverse } => 0x11,
        Operation::SetFailsafe => 0x12,
        Operation::GetFailsafe => 0x13,
        Operation::ResetEpo => 0x14,
        Operation::GetEpo => 0x15,
        Operation::SetEpoIgnore => 0x16,
        Operation::GetEpoIgnore => 0x17,
        Operation::GetNewIr => 0x18,
        Operation::SetIrLed => 0x1A,
        Operation::GetIrLed => 0x1B,
        Operation::GetAnalog { channel: 1 } => 0x1C,
        Operation::GetAnalog { channel: 2 } => 0x1D,
        _ => return None,
    };
    Some(opcode)
}

fn diabolo_opcode(op: Operation) -> Option<u8> {
    use Direction::{Forward, Reverse};

    let opcode = match op {
        Operation::SetMotor { channel: 1, direction: Forward } => 0x03,
        Operation::SetMotor { channel: 1, direction: Reverse } => 0x04,
        Operation::GetMotor { channel: 1 } => 0x05,
        Operation::SetMotor { channel: 2, direction: Forward } => 0x06,
        Operation::SetMotor { channel: 2, direction: Reverse } => 0x07,
        Operation::GetMotor { channel: 2 } => 0x08,
        Operation::AllOff => 0x09,
        Operation::SetAllMotors { direction: Forward } => 0x0F,
        Operation::SetAllMotors { direction: Reverse } => 0x10,
        Operation::SetFailsafe => 0x11,
        Operation::GetFailsafe => 0x12,
        _ => return None,
    };
    Some(opcode)
}

fn ultraborg_opcode(op: Operation) -> Option<u8> {
    let opcode = match op {
        Operation::GetDistance { channel, mode } if (1..=4).contains(&channel) => match mode {
            FilterMode::Unfiltered => channel,
            FilterMode::Filtered => 0x28 + channel,
        },
        Operation::SetServo { channel } if (1..=4).contains(&channel) => 0x05 + (channel - 1) * 2,
        Operation::GetServo { channel } if (1..=4).contains(&channel) => 0x06 + (channel - 1) * 2,
        Operation::CalibrateServo { channel } if (1..=4).contains(&channel) => 0x0C + channel,
        Operation::GetServoBoundary { channel, boundary } if (1..=4).contains(&channel) => {
            0x11 + (channel - 1) * 3 + boundary.index()
        }
        Operation::SetServoBoundary { channel, boundary } if (1..=4).contains(&channel) => {
            0x1D + (channel - 1) * 3 + boundary.index()
        }
        _ => return None,
    };
    Some(opcode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thunderborg_motor_opcodes() {
        let t = &THUNDERBORG;
        let fwd_a = Operation::SetMotor { channel: 1, direction: Direction::Forward };
        let rev_b = Operation::SetMotor { channel: 2, direction: Direction::Reverse };
        assert_eq!(t.opcode(fwd_a).unwrap(), 0x08);
        assert_eq!(t.opcode(rev_b).unwrap(), 0x0C);
        assert_eq!(t.opcode(Operation::GetMotor { channel: 2 }).unwrap(), 0x0D);
        assert_eq!(t.opcode(Operation::AllOff).unwrap(), 0x0E);
    }

    #[test]
    fn test_zeroborg_motor_opcodes() {
        let t = &ZEROBORG;
        let expected = [(1, 0x03, 0x04, 0x05), (2, 0x06, 0x07, 0x08), (3, 0x09, 0x0A, 0x0B), (4, 0x0C, 0x0D, 0x0E)];
        for (channel, fwd, rev, get) in expected {
            assert_eq!(t.opcode(Operation::SetMotor { channel, direction: Direction::Forward }).unwrap(), fwd);
            assert_eq!(t.opcode(Operation::SetMotor { channel, direction: Direction::Reverse }).unwrap(), rev);
            assert_eq!(t.opcode(Operation::GetMotor { channel }).unwrap(), get);
        }
        assert!(!t.supports(Operation::GetMotor { channel: 5 }));
    }

    #[test]
    fn test_ultraborg_servo_opcodes() {
        let t = &ULTRABORG;
        assert_eq!(t.opcode(Operation::SetServo { channel: 1 }).unwrap(), 0x05);
        assert_eq!(t.opcode(Operation::GetServo { channel: 4 }).unwrap(), 0x0C);
        assert_eq!(t.opcode(Operation::CalibrateServo { channel: 3 }).unwrap(), 0x0F);

        let get = |channel, boundary| t.opcode(Operation::GetServoBoundary { channel, boundary }).unwrap();
        let set = |channel, boundary| t.opcode(Operation::SetServoBoundary { channel, boundary }).unwrap();
        assert_eq!(get(1, ServoBoundary::Minimum), 0x11);
        assert_eq!(get(2, ServoBoundary::Boot), 0x16);
        assert_eq!(get(4, ServoBoundary::Boot), 0x1C);
        assert_eq!(set(1, ServoBoundary::Minimum), 0x1D);
        assert_eq!(set(3, ServoBoundary::Maximum), 0x24);
        assert_eq!(set(4, ServoBoundary::Boot), 0x28);
    }

    #[test]
    fn test_ultraborg_distance_opcodes() {
        let t = &ULTRABORG;
        let op = |channel, mode| t.opcode(Operation::GetDistance { channel, mode }).unwrap();
        assert_eq!(op(1, FilterMode::Unfiltered), 0x01);
        assert_eq!(op(4, FilterMode::Unfiltered), 0x04);
        assert_eq!(op(1, FilterMode::Filtered), 0x29);
        assert_eq!(op(4, FilterMode::Filtered), 0x2C);
    }

    #[test]
    fn test_unsupported_operations() {
        let err = DIABOLO.opcode(Operation::GetEpo).unwrap_err();
        assert!(matches!(err, BorgError::Unsupported { board: "Diabolo", .. }));
        assert!(!ULTRABORG.supports(Operation::AllOff));
        assert!(!THUNDERBORG.supports(Operation::GetMotor { channel: 3 }));
    }

    #[test]
    fn test_check_channel() {
        assert!(THUNDERBORG.check_channel(0).is_err());
        assert!(THUNDERBORG.check_channel(2).is_ok());
        assert!(THUNDERBORG.check_channel(3).is_err());
        assert!(ZEROBORG.check_channel(4).is_ok());
    }
}
