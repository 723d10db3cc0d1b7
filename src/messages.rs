// Data types passed between the drivers and their callers

use serde::{Deserialize, Serialize};

// LED colour, one byte per channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

// Persistent ThunderBorg settings, as read by read_settings and pushed back by
// apply_settings. Voltages are in volts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThunderBorgSettings {
    pub board_address: u8,
    // Full-scale voltage of the sense pin, informational only
    pub voltage_pin_max: f32,
    pub battery_min: f32,
    pub battery_max: f32,
    pub led1: Rgb,
    pub led2: Rgb,
    pub battery_monitoring: bool,
    pub failsafe: bool,
}

/// How much an UltraBorg environment read covers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    // Distances only
    #[default]
    SensorsOnly,
    // Distances plus raw servo drive
    QuickScan,
    // Everything above plus stored servo limits
    FullScan,
}

/// One servo output as seen during an environment read
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServoReading {
    pub channel: u8,
    pub pwm: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot: Option<u16>,
}

// Snapshot from read_environment; distances in mm, 0 = nothing in range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UltraBorgReading {
    pub distances: [u16; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servos: Option<Vec<ServoReading>>,
}

/// Status report printed by the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "board", rename_all = "snake_case")]
pub enum BoardStatus {
    ThunderBorg {
        address: u8,
        battery_voltage: f32,
        motors: Vec<i16>,
        drive_faults: Vec<bool>,
        settings: ThunderBorgSettings,
    },
    ZeroBorg {
        address: u8,
        motors: Vec<i16>,
        failsafe: bool,
        epo: bool,
        epo_ignore: bool,
        analog: [f32; 2],
    },
    Diabolo {
        address: u8,
        motors: Vec<i16>,
        failsafe: bool,
    },
    UltraBorg {
        address: u8,
        reading: UltraBorgReading,
    },
}
