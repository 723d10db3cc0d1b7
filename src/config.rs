// Bus defaults, polling rates, demo limits
use std::time::Duration;

// I2C bus the boards sit on (/dev/i2c-1 on a Raspberry Pi header)
pub const DEFAULT_BUS: u8 = 1;

// Distance polling loop frequency
pub const POLL_HZ: u64 = 20;

// How long `motor` keeps a motor running before stopping it
pub const MOTOR_RUN_TIME: Duration = Duration::from_millis(1000);

// Demo power ceiling (out of 255), keeps test runs gentle
pub const DEMO_MAX_POWER: i16 = 128;

// Servo teleop step per key press, on the -1.0..=1.0 position scale
pub const SERVO_STEP: f32 = 0.05;
