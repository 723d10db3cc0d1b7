// I2C driver family for PiBorg motor, servo and sensor boards
//
// Provides:
// - Bus address discovery and reassignment
// - Per-board opcode tables and command framing
// - Motor, LED, battery and EPO control
// - EEPROM-backed servo and battery calibration
// - Throttled ultrasonic distance reads

mod calibration;
mod driver;
pub mod opcodes;
pub mod protocol;
pub mod resolver;
mod sensor;
pub mod transport;

pub use calibration::{
    CalibrationState, ServoLimits, BATTERY_LIMITS_SETTLE, DEFAULT_PWM_MAX, DEFAULT_PWM_MIN,
    EEPROM_SETTLE,
};
pub use driver::{level_to_volts, volts_to_level, Board, BoardState};
pub use opcodes::{BoardKind, Diabolo, Operation, ServoBoundary, ThunderBorg, UltraBorg, ZeroBorg};
pub use protocol::{BoardAddress, BorgError, Direction, Result};
pub use sensor::{distance_mm, FilterMode, SensorClock, SensorThrottle, POLL_INTERVAL};
#[cfg(target_os = "linux")]
pub use transport::LinuxI2c;
pub use transport::BusProvider;
