// EEPROM-backed calibration
//
// Servo limits (UltraBorg) and battery monitor limits (ThunderBorg) are stored
// on the board. Writes need a settle delay before the value can be read back.

use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::driver::{level_to_volts, volts_to_level, Board};
use super::opcodes::{Operation, ServoBoundary, ThunderBorg, UltraBorg};
use super::protocol::{BorgError, Result};
use super::transport::BusProvider;

/// Time the UltraBorg needs after an EEPROM write
pub const EEPROM_SETTLE: Duration = Duration::from_millis(10);
/// Time the ThunderBorg needs after storing battery limits
pub const BATTERY_LIMITS_SETTLE: Duration = Duration::from_millis(200);

/// Factory PWM limits, assumed until the board has been read
pub const DEFAULT_PWM_MIN: u16 = 2000;
pub const DEFAULT_PWM_MAX: u16 = 4000;

/// Cached PWM limits for one servo output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoLimits {
    pub minimum: u16,
    pub maximum: u16,
}

impl Default for ServoLimits {
    fn default() -> Self {
        Self {
            minimum: DEFAULT_PWM_MIN,
            maximum: DEFAULT_PWM_MAX,
        }
    }
}

impl ServoLimits {
    /// Range a boot position must fall in, whichever way round min/max are
    pub fn boot_range(&self) -> (u16, u16) {
        (
            self.minimum.min(self.maximum),
            self.minimum.max(self.maximum),
        )
    }

    /// Map -1.0..=1.0 onto minimum..maximum. Out of range positions are clamped.
    pub fn position_to_pwm(&self, position: f32) -> u16 {
        let position = position.clamp(-1.0, 1.0);
        let span = self.maximum as i32 - self.minimum as i32;
        let offset = (span as f32 * (position + 1.0) / 2.0) as i32;
        (offset + self.minimum as i32).clamp(0, u16::MAX as i32) as u16
    }

    pub fn pwm_to_position(&self, pwm: u16) -> f32 {
        let span = self.maximum as f32 - self.minimum as f32;
        if span == 0.0 {
            return 0.0;
        }
        2.0 * (pwm as f32 - self.minimum as f32) / span - 1.0
    }
}

/// Per-channel servo limits as last read from the board
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CalibrationState {
    limits: [ServoLimits; 4],
}

impl CalibrationState {
    /// Limits for a 1-based channel, `None` outside 1..=4
    pub fn limits(&self, channel: u8) -> Option<ServoLimits> {
        let index = (channel as usize).checked_sub(1)?;
        self.limits.get(index).copied()
    }

    /// Channel already checked against the opcode table
    fn channel(&self, channel: u8) -> ServoLimits {
        self.limits[channel as usize - 1]
    }

    fn update(&mut self, channel: u8, boundary: ServoBoundary, value: u16) {
        let limits = &mut self.limits[channel as usize - 1];
        match boundary {
            ServoBoundary::Minimum => limits.minimum = value,
            ServoBoundary::Maximum => limits.maximum = value,
            ServoBoundary::Boot => {}
        }
    }
}

impl<P: BusProvider> Board<UltraBorg, P> {
    pub fn calibration(&self) -> &CalibrationState {
        &self.cache.calibration
    }

    /// Read the stored minimum and maximum of every servo into the cache
    pub fn load_calibration(&mut self) -> Result<()> {
        for channel in 1..=self.table().channels {
            for boundary in [ServoBoundary::Minimum, ServoBoundary::Maximum] {
                let value = self.get_servo(channel, boundary)?;
                self.cache.calibration.update(channel, boundary, value);
            }
            debug!(
                "Servo {} limits {:?}",
                channel,
                self.cache.calibration.channel(channel)
            );
        }
        Ok(())
    }

    /// Read a stored PWM limit
    pub fn get_servo(&self, channel: u8, boundary: ServoBoundary) -> Result<u16> {
        self.address()?;
        self.table().check_channel(channel)?;
        Ok(self
            .query(Operation::GetServoBoundary { channel, boundary })?
            .word())
    }

    /// Store a PWM limit in EEPROM.
    ///
    /// A boot position must lie within the cached minimum and maximum or it
    /// is refused without touching the bus. After a minimum or maximum write
    /// the stored value is read back into the cache, even when the board
    /// kept something other than what was asked for.
    /// If that read fails the call returns `ReadbackFailed` and the cache
    /// takes the written value.
    pub fn set_servo(&mut self, channel: u8, boundary: ServoBoundary, value: u16) -> Result<()> {
        self.write_servo(channel, boundary, value).map(|_| ())
    }

    /// As `set_servo`, then fail with `PersistenceUnverified` if the board
    /// does not report the written value.
    pub fn set_servo_verified(
        &mut self,
        channel: u8,
        boundary: ServoBoundary,
        value: u16,
    ) -> Result<()> {
        let stored = match self.write_servo(channel, boundary, value)? {
            Some(stored) => stored,
            None => self
                .get_servo(channel, boundary)
                .map_err(|e| readback_failed(boundary_name(boundary), e))?,
        };

        if stored != value {
            return Err(BorgError::PersistenceUnverified {
                setting: boundary_name(boundary),
                written: value,
                stored,
            });
        }
        Ok(())
    }

    /// Returns the readback for minimum/maximum writes
    fn write_servo(
        &mut self,
        channel: u8,
        boundary: ServoBoundary,
        value: u16,
    ) -> Result<Option<u16>> {
        self.address()?;
        self.table().check_channel(channel)?;

        if boundary == ServoBoundary::Boot {
            let (low, high) = self.cache.calibration.channel(channel).boot_range();
            if !(low..=high).contains(&value) {
                return Err(BorgError::OutOfRange {
                    what: "servo boot position",
                    value: value as i64,
                    min: low as i64,
                    max: high as i64,
                });
            }
        }

        let frame = self
            .command(Operation::SetServoBoundary { channel, boundary })?
            .with_u16(value);
        info!(
            "Storing servo {} {} = {}",
            channel,
            boundary_name(boundary),
            value
        );
        self.send(&frame)?;
        sleep(EEPROM_SETTLE);

        if boundary == ServoBoundary::Boot {
            return Ok(None);
        }

        let stored = match self.get_servo(channel, boundary) {
            Ok(stored) => stored,
            Err(e) => {
                // The write went out, so the board most likely holds it
                self.cache.calibration.update(channel, boundary, value);
                return Err(readback_failed(boundary_name(boundary), e));
            }
        };
        if stored != value {
            warn!(
                "Servo {} {} reads back as {}, asked for {}",
                channel,
                boundary_name(boundary),
                stored,
                value
            );
        }
        self.cache.calibration.update(channel, boundary, stored);
        Ok(Some(stored))
    }

    /// Drive a servo to a position between -1.0 and 1.0 of its calibrated range
    pub fn set_servo_position(&mut self, channel: u8, position: f32) -> Result<()> {
        self.address()?;
        self.table().check_channel(channel)?;
        let pwm = self
            .cache
            .calibration
            .channel(channel)
            .position_to_pwm(position);
        debug!("Servo {} -> {:.3} (PWM {})", channel, position, pwm);
        let frame = self.command(Operation::SetServo { channel })?.with_u16(pwm);
        self.send(&frame)
    }

    /// Current servo position on the -1.0..=1.0 scale
    pub fn servo_position(&self, channel: u8) -> Result<f32> {
        let pwm = self.raw_servo_position(channel)?;
        Ok(self.cache.calibration.channel(channel).pwm_to_position(pwm))
    }

    /// Current servo drive as a raw PWM value
    pub fn raw_servo_position(&self, channel: u8) -> Result<u16> {
        self.address()?;
        self.table().check_channel(channel)?;
        Ok(self.query(Operation::GetServo { channel })?.word())
    }

    /// Drive a servo with a raw PWM value, ignoring the stored limits.
    ///
    /// Used while finding those limits; a bad value can push the servo past
    /// its end stops.
    pub fn calibrate_servo_position(&mut self, channel: u8, pwm: u16) -> Result<()> {
        self.address()?;
        self.table().check_channel(channel)?;
        let frame = self
            .command(Operation::CalibrateServo { channel })?
            .with_u16(pwm);
        self.send(&frame)
    }
}

impl<P: BusProvider> Board<ThunderBorg, P> {
    /// Store the battery monitor range in volts.
    ///
    /// Values are clamped to what the board can represent, then read back;
    /// a mismatch is reported as `PersistenceUnverified`.
    pub fn set_battery_limits(&mut self, minimum: f32, maximum: f32) -> Result<()> {
        let levels = [volts_to_level(minimum), volts_to_level(maximum)];
        let frame = self
            .command(Operation::SetBatteryLimits)?
            .with_bytes(&levels);
        info!(
            "Storing battery limits {:.2} V .. {:.2} V",
            level_to_volts(levels[0]),
            level_to_volts(levels[1])
        );
        self.send(&frame)?;
        sleep(BATTERY_LIMITS_SETTLE);

        let response = self
            .query(Operation::GetBatteryLimits)
            .map_err(|e| readback_failed("battery limits", e))?;
        let stored = [response.byte(1), response.byte(2)];
        if stored != levels {
            warn!("Battery limits read back as {:?}, wrote {:?}", stored, levels);
            return Err(BorgError::PersistenceUnverified {
                setting: "battery limits",
                written: u16::from_be_bytes(levels),
                stored: u16::from_be_bytes(stored),
            });
        }
        Ok(())
    }
}

fn readback_failed(setting: &'static str, error: BorgError) -> BorgError {
    warn!("{} was written but the readback failed: {}", setting, error);
    BorgError::ReadbackFailed {
        setting,
        reason: error.to_string(),
    }
}

fn boundary_name(boundary: ServoBoundary) -> &'static str {
    match boundary {
        ServoBoundary::Minimum => "minimum",
        ServoBoundary::Maximum => "maximum",
        ServoBoundary::Boot => "boot position",
    }
}

#[cfg(test)]
mod tests {
    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};

    use super::super::transport::testing::MockBus;
    use super::*;

    const ADDR: u8 = 0x36;

    #[test]
    fn test_boot_within_limits_is_written() {
        let expectations = [I2cTrans::write(ADDR, vec![0x1F, 0x0B, 0xB8])];
        let mut mock = I2cMock::new(&expectations);
        let mut board: Board<UltraBorg, _> = Board::bound(MockBus(mock.clone()), 1, ADDR);
        board.set_servo(1, ServoBoundary::Boot, 3000).unwrap();
        mock.done();
    }

    #[test]
    fn test_boot_outside_limits_is_refused() {
        let expectations: Vec<I2cTrans> = Vec::new();
        let mut mock = I2cMock::new(&expectations);
        let mut board: Board<UltraBorg, _> = Board::bound(MockBus(mock.clone()), 1, ADDR);
        let err = board.set_servo(1, ServoBoundary::Boot, 5000).unwrap_err();
        assert!(matches!(
            err,
            BorgError::OutOfRange {
                min: 2000,
                max: 4000,
                ..
            }
        ));
        assert!(board.set_servo(1, ServoBoundary::Boot, 1999).is_err());
        mock.done();
    }

    #[test]
    fn test_minimum_write_refreshes_cache_from_readback() {
        // Board stores 2510 where 2500 was asked for; that is tolerated
        let expectations = [
            I2cTrans::write(ADDR, vec![0x20, 0x09, 0xC4]),
            I2cTrans::write(ADDR, vec![0x14]),
            I2cTrans::read(ADDR, vec![0x14, 0x09, 0xCE, 0x00]),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut board: Board<UltraBorg, _> = Board::bound(MockBus(mock.clone()), 1, ADDR);
        board.set_servo(2, ServoBoundary::Minimum, 2500).unwrap();
        assert_eq!(board.calibration().limits(2).unwrap().minimum, 2510);
        assert_eq!(board.calibration().limits(2).unwrap().maximum, DEFAULT_PWM_MAX);
        mock.done();
    }

    #[test]
    fn test_failed_readback_is_reported_and_cached() {
        let expectations = [
            I2cTrans::write(ADDR, vec![0x1D, 0x0B, 0xB8]),
            I2cTrans::write(ADDR, vec![0x11]).with_error(ErrorKind::Other),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut board: Board<UltraBorg, _> = Board::bound(MockBus(mock.clone()), 1, ADDR);
        let err = board
            .set_servo(1, ServoBoundary::Minimum, 3000)
            .unwrap_err();
        assert!(matches!(
            err,
            BorgError::ReadbackFailed {
                setting: "minimum",
                ..
            }
        ));
        assert_eq!(board.calibration().limits(1).unwrap().minimum, 3000);

        // Boot is now checked against the landed minimum
        let err = board.set_servo(1, ServoBoundary::Boot, 2500).unwrap_err();
        assert!(matches!(
            err,
            BorgError::OutOfRange {
                min: 3000,
                max: 4000,
                ..
            }
        ));
        mock.done();
    }

    #[test]
    fn test_verified_boot_readback_failure() {
        let expectations = [
            I2cTrans::write(ADDR, vec![0x1F, 0x0B, 0xB8]),
            I2cTrans::write(ADDR, vec![0x13]),
            I2cTrans::read(ADDR, vec![0; 4]).with_error(ErrorKind::Other),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut board: Board<UltraBorg, _> = Board::bound(MockBus(mock.clone()), 1, ADDR);
        let err = board
            .set_servo_verified(1, ServoBoundary::Boot, 3000)
            .unwrap_err();
        assert!(matches!(
            err,
            BorgError::ReadbackFailed {
                setting: "boot position",
                ..
            }
        ));
        mock.done();
    }

    #[test]
    fn test_verified_write_reports_mismatch() {
        let expectations = [
            I2cTrans::write(ADDR, vec![0x1E, 0x0F, 0xA0]),
            I2cTrans::write(ADDR, vec![0x12]),
            I2cTrans::read(ADDR, vec![0x12, 0x0F, 0x00, 0x00]),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut board: Board<UltraBorg, _> = Board::bound(MockBus(mock.clone()), 1, ADDR);
        let err = board
            .set_servo_verified(1, ServoBoundary::Maximum, 4000)
            .unwrap_err();
        assert!(matches!(
            err,
            BorgError::PersistenceUnverified {
                written: 4000,
                stored: 3840,
                ..
            }
        ));
        assert_eq!(board.calibration().limits(1).unwrap().maximum, 3840);
        mock.done();
    }

    #[test]
    fn test_verified_boot_write_reads_back() {
        let expectations = [
            I2cTrans::write(ADDR, vec![0x1F, 0x0B, 0xB8]),
            I2cTrans::write(ADDR, vec![0x13]),
            I2cTrans::read(ADDR, vec![0x13, 0x0B, 0xB8, 0x00]),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut board: Board<UltraBorg, _> = Board::bound(MockBus(mock.clone()), 1, ADDR);
        board
            .set_servo_verified(1, ServoBoundary::Boot, 3000)
            .unwrap();
        mock.done();
    }

    #[test]
    fn test_servo_position_uses_cached_limits() {
        let expectations = [
            I2cTrans::write(ADDR, vec![0x05, 0x0B, 0xB8]),
            I2cTrans::write(ADDR, vec![0x07, 0x0F, 0xA0]),
            I2cTrans::write(ADDR, vec![0x06]),
            I2cTrans::read(ADDR, vec![0x06, 0x07, 0xD0, 0x00]),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut board: Board<UltraBorg, _> = Board::bound(MockBus(mock.clone()), 1, ADDR);
        board.set_servo_position(1, 0.0).unwrap();
        board.set_servo_position(2, 1.5).unwrap();
        assert_eq!(board.servo_position(1).unwrap(), -1.0);
        mock.done();
    }

    #[test]
    fn test_calibrate_position_is_unchecked() {
        let expectations = [I2cTrans::write(ADDR, vec![0x10, 0x13, 0x88])];
        let mut mock = I2cMock::new(&expectations);
        let mut board: Board<UltraBorg, _> = Board::bound(MockBus(mock.clone()), 1, ADDR);
        board.calibrate_servo_position(4, 5000).unwrap();
        mock.done();
    }

    #[test]
    fn test_load_calibration() {
        let mut expectations = Vec::new();
        for channel in 0u8..4 {
            let min_op = 0x11 + channel * 3;
            let max_op = min_op + 1;
            expectations.push(I2cTrans::write(ADDR, vec![min_op]));
            expectations.push(I2cTrans::read(ADDR, vec![min_op, 0x05, 0xDC, 0x00]));
            expectations.push(I2cTrans::write(ADDR, vec![max_op]));
            expectations.push(I2cTrans::read(ADDR, vec![max_op, 0x11, 0x94, 0x00]));
        }
        let mut mock = I2cMock::new(&expectations);
        let mut board: Board<UltraBorg, _> = Board::bound(MockBus(mock.clone()), 1, ADDR);
        board.load_calibration().unwrap();
        for channel in 1..=4 {
            let limits = board.calibration().limits(channel).unwrap();
            assert_eq!(limits.minimum, 1500);
            assert_eq!(limits.maximum, 4500);
        }
        mock.done();
    }

    #[test]
    fn test_battery_limits_verified() {
        let expectations = [
            I2cTrans::write(0x15, vec![0x16, 49, 118]),
            I2cTrans::write(0x15, vec![0x17]),
            I2cTrans::read(0x15, vec![0x17, 49, 118, 0, 0, 0]),
            I2cTrans::write(0x15, vec![0x16, 49, 118]),
            I2cTrans::write(0x15, vec![0x17]),
            I2cTrans::read(0x15, vec![0x17, 0, 255, 0, 0, 0]),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut board: Board<ThunderBorg, _> = Board::bound(MockBus(mock.clone()), 1, 0x15);
        board.set_battery_limits(7.0, 16.8).unwrap();
        let err = board.set_battery_limits(7.0, 16.8).unwrap_err();
        assert!(matches!(err, BorgError::PersistenceUnverified { .. }));
        mock.done();
    }

    #[test]
    fn test_battery_limits_readback_failure() {
        let expectations = [
            I2cTrans::write(0x15, vec![0x16, 49, 118]),
            I2cTrans::write(0x15, vec![0x17]).with_error(ErrorKind::Other),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut board: Board<ThunderBorg, _> = Board::bound(MockBus(mock.clone()), 1, 0x15);
        let err = board.set_battery_limits(7.0, 16.8).unwrap_err();
        assert!(matches!(
            err,
            BorgError::ReadbackFailed {
                setting: "battery limits",
                ..
            }
        ));
        mock.done();
    }

    #[test]
    fn test_limits_outside_channels() {
        let state = CalibrationState::default();
        assert_eq!(state.limits(0), None);
        assert_eq!(state.limits(5), None);
        assert_eq!(state.limits(4), Some(ServoLimits::default()));
    }

    #[test]
    fn test_position_mapping() {
        let limits = ServoLimits::default();
        assert_eq!(limits.position_to_pwm(-1.0), 2000);
        assert_eq!(limits.position_to_pwm(0.0), 3000);
        assert_eq!(limits.position_to_pwm(1.0), 4000);
        assert_eq!(limits.position_to_pwm(-3.0), 2000);
        assert_eq!(limits.pwm_to_position(4000), 1.0);

        let flat = ServoLimits {
            minimum: 3000,
            maximum: 3000,
        };
        assert_eq!(flat.pwm_to_position(3500), 0.0);

        let reversed = ServoLimits {
            minimum: 4000,
            maximum: 2000,
        };
        assert_eq!(reversed.boot_range(), (2000, 4000));
        assert_eq!(reversed.position_to_pwm(1.0), 2000);
    }
}
