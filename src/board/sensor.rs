// Ultrasonic distance sensing (UltraBorg)
//
// The board pings each sensor on its own schedule. Polling one channel faster
// than about every 10 ms just returns the same reading, so reads are gated by
// a per-channel clock.

use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::driver::Board;
use super::opcodes::{Operation, ServoBoundary, UltraBorg};
use super::protocol::Result;
use super::transport::BusProvider;
use crate::messages::{ScanType, ServoReading, UltraBorgReading};

/// Minimum time between two reads of the same sensor
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Granularity of the wait
pub const POLL_STEP: Duration = Duration::from_millis(1);

/// Raw echo time to millimetres
pub const USM_US_TO_MM: f64 = 0.1714971702966901;
/// Raw value reported when no echo came back
pub const DISTANCE_NO_ECHO: u16 = 0xFFFF;

/// Whether to read the board's smoothed value or the last raw ping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    Filtered,
    Unfiltered,
}

/// Time of the last successful read on one channel
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorClock {
    last_poll: Option<Instant>,
}

impl SensorClock {
    /// Time left before the channel may be read again
    pub fn remaining(&self, interval: Duration) -> Duration {
        match self.last_poll {
            Some(last) => interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Sleep in `step` increments until `interval` has passed since the last poll
    pub fn wait(&self, interval: Duration, step: Duration) {
        while !self.remaining(interval).is_zero() {
            sleep(step);
        }
    }

    pub fn reset(&mut self) {
        self.last_poll = Some(Instant::now());
    }
}

/// Read gate for the four sensor channels
#[derive(Debug)]
pub struct SensorThrottle {
    enabled: bool,
    clocks: [SensorClock; 4],
}

impl Default for SensorThrottle {
    fn default() -> Self {
        Self {
            enabled: true,
            clocks: [SensorClock::default(); 4],
        }
    }
}

impl SensorThrottle {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn wait(&self, channel: u8) {
        if self.enabled {
            self.clocks[channel as usize - 1].wait(POLL_INTERVAL, POLL_STEP);
        }
    }

    fn mark(&mut self, channel: u8) {
        if self.enabled {
            self.clocks[channel as usize - 1].reset();
        }
    }
}

/// Convert a raw sensor reading to millimetres; no echo reads as 0
pub fn distance_mm(raw: u16) -> u16 {
    if raw == DISTANCE_NO_ECHO {
        0
    } else {
        (raw as f64 * USM_US_TO_MM).round() as u16
    }
}

impl<P: BusProvider> Board<UltraBorg, P> {
    /// Turn the per-channel read gate on or off
    pub fn set_sensor_throttle(&mut self, enabled: bool) {
        self.cache.sensors.enabled = enabled;
    }

    pub fn sensor_throttle(&self) -> bool {
        self.cache.sensors.is_enabled()
    }

    /// Distance seen by one ultrasonic sensor, in millimetres (0 if nothing in range)
    pub fn get_distance(&mut self, channel: u8, mode: FilterMode) -> Result<u16> {
        self.address()?;
        self.table().check_channel(channel)?;
        let op = Operation::GetDistance { channel, mode };
        self.table().opcode(op)?;

        self.cache.sensors.wait(channel);
        let raw = self.query(op)?.word();
        self.cache.sensors.mark(channel);

        let mm = distance_mm(raw);
        debug!("Sensor {} ({:?}): raw {} -> {} mm", channel, mode, raw, mm);
        Ok(mm)
    }

    /// Read all sensors and, depending on `scan`, the servo state too
    pub fn read_environment(&mut self, scan: ScanType) -> Result<UltraBorgReading> {
        let mut distances = [0u16; 4];
        for (i, distance) in distances.iter_mut().enumerate() {
            *distance = self.get_distance(i as u8 + 1, FilterMode::Filtered)?;
        }

        let mut reading = UltraBorgReading {
            distances,
            servos: None,
        };
        if scan == ScanType::SensorsOnly {
            return Ok(reading);
        }

        let mut servos = Vec::with_capacity(4);
        for channel in 1..=4 {
            let pwm = self.raw_servo_position(channel)?;
            let mut servo = ServoReading {
                channel,
                pwm,
                minimum: None,
                maximum: None,
                boot: None,
            };
            if scan == ScanType::FullScan {
                servo.minimum = Some(self.get_servo(channel, ServoBoundary::Minimum)?);
                servo.maximum = Some(self.get_servo(channel, ServoBoundary::Maximum)?);
                servo.boot = Some(self.get_servo(channel, ServoBoundary::Boot)?);
            }
            servos.push(servo);
        }
        reading.servos = Some(servos);
        Ok(reading)
    }
}
