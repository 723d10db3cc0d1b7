// Generic board driver
//
// One engine serves every board type. The board kind supplies the opcode
// table; everything else (address binding, framing, motor power encoding,
// boolean settings) is shared.

use std::marker::PhantomData;

use tracing::{debug, info, warn};

use super::opcodes::{BoardKind, Diabolo, OpcodeTable, Operation, ThunderBorg, ZeroBorg};
use super::protocol::{
    encode_power, BoardAddress, BorgError, CommandFrame, Link, ResponseFrame, Result,
    COMMAND_GET_ID, COMMAND_VALUE_OFF, COMMAND_VALUE_ON,
};
use super::resolver;
use super::transport::BusProvider;
use crate::messages::{Rgb, ThunderBorgSettings};

/// Full-scale reading of the 10-bit ADCs
pub const COMMAND_ANALOG_MAX: f32 = 1023.0;
/// Voltage at full scale on the ThunderBorg battery sense pin
pub const VOLTAGE_PIN_MAX: f32 = 36.3;
pub const VOLTAGE_PIN_CORRECTION: f32 = 0.0;
/// Voltage at full scale on the ZeroBorg analog inputs
pub const ANALOG_PIN_MAX: f32 = 3.3;

/// Where a board is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardState {
    Uninitialized,
    Resolving,
    Ready(BoardAddress),
    NotFound,
}

/// Driver for one board of kind `K`, reached through bus provider `P`
pub struct Board<K: BoardKind, P: BusProvider> {
    provider: P,
    bus: u8,
    state: BoardState,
    pub(crate) cache: K::Cache,
    _kind: PhantomData<K>,
}

impl<K: BoardKind, P: BusProvider> Board<K, P> {
    /// Create an unbound driver; call `resolve` before anything else
    pub fn new(provider: P, bus: u8) -> Self {
        Self {
            provider,
            bus,
            state: BoardState::Uninitialized,
            cache: K::Cache::default(),
            _kind: PhantomData,
        }
    }

    /// Scan the bus and bind to the board found there
    pub fn connect(provider: P, bus: u8) -> Result<Self> {
        let mut board = Self::new(provider, bus);
        board.resolve()?;
        Ok(board)
    }

    /// Bind to a board at a known address after checking its device ID
    pub fn attach(provider: P, bus: u8, address: BoardAddress) -> Result<Self> {
        let mut board = Self::new(provider, bus);
        board.state = BoardState::Resolving;
        if resolver::probe(&board.provider, bus, address, K::TABLE)? {
            info!("Attached {} at {} on bus {}", K::TABLE.name, address, bus);
            board.state = BoardState::Ready(address);
            Ok(board)
        } else {
            board.state = BoardState::NotFound;
            Err(BorgError::NotFound {
                board: K::TABLE.name,
                bus,
            })
        }
    }

    /// Sweep the bus for a board of this kind without binding to it
    pub fn scan(provider: &P, bus: u8) -> Result<Option<BoardAddress>> {
        resolver::scan(provider, bus, K::TABLE)
    }

    /// Permanently move a board of this kind to `new_address`.
    ///
    /// See [`resolver::set_new_address`]; the change survives power cycles.
    pub fn set_new_address(
        provider: &P,
        bus: u8,
        new_address: u8,
        old_address: Option<BoardAddress>,
    ) -> Result<BoardAddress> {
        resolver::set_new_address(provider, bus, K::TABLE, new_address, old_address)
    }

    /// Resolve the board's address by scanning.
    ///
    /// Once bound the address never changes; calling this again on a ready
    /// board returns the bound address without touching the bus.
    pub fn resolve(&mut self) -> Result<BoardAddress> {
        if let BoardState::Ready(address) = self.state {
            return Ok(address);
        }

        self.state = BoardState::Resolving;
        match resolver::scan(&self.provider, self.bus, K::TABLE) {
            Ok(Some(address)) => {
                info!("Loaded {} on bus {}, address {}", K::TABLE.name, self.bus, address);
                self.state = BoardState::Ready(address);
                Ok(address)
            }
            Ok(None) => {
                self.state = BoardState::NotFound;
                Err(BorgError::NotFound {
                    board: K::TABLE.name,
                    bus: self.bus,
                })
            }
            Err(e) => {
                self.state = BoardState::Uninitialized;
                Err(e)
            }
        }
    }

    /// A board already bound to `address`, for unit tests that skip the scan
    #[cfg(test)]
    pub(crate) fn bound(provider: P, bus: u8, address: u8) -> Self {
        let mut board = Self::new(provider, bus);
        board.state = BoardState::Ready(BoardAddress::new(address).unwrap());
        board
    }

    pub fn state(&self) -> BoardState {
        self.state
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn table(&self) -> &'static OpcodeTable {
        K::TABLE
    }

    /// The bound address, or `NotInitialized` before resolution
    pub fn address(&self) -> Result<BoardAddress> {
        match self.state {
            BoardState::Ready(address) => Ok(address),
            _ => Err(BorgError::NotInitialized {
                board: K::TABLE.name,
            }),
        }
    }

    pub(crate) fn link(&self) -> Result<Link<'_, P>> {
        let address = self.address()?;
        Ok(Link {
            provider: &self.provider,
            bus: self.bus,
            address: address.get(),
            frame_len: K::TABLE.frame_len,
        })
    }

    /// Frame for `op` with no payload yet
    pub(crate) fn command(&self, op: Operation) -> Result<CommandFrame> {
        Ok(CommandFrame::new(K::TABLE.opcode(op)?))
    }

    pub(crate) fn send(&self, frame: &CommandFrame) -> Result<()> {
        self.link()?.send(frame)
    }

    /// Issue a read-type operation and return its validated response
    pub(crate) fn query(&self, op: Operation) -> Result<ResponseFrame> {
        let link = self.link()?;
        let frame = self.command(op)?;
        link.query(&frame)
    }

    pub(crate) fn get_flag(&self, op: Operation) -> Result<bool> {
        let state = self.query(op)?.flag();
        debug!("{} {}: {}", K::TABLE.name, op.name(), state);
        Ok(state)
    }

    /// Write a boolean setting only if the board does not already hold it.
    ///
    /// Several of these live in EEPROM, so an unchanged value costs one read
    /// and no write.
    pub(crate) fn set_flag(&self, get: Operation, set: Operation, value: bool) -> Result<()> {
        let frame = self.command(set)?;
        let current = self.get_flag(get)?;
        if current == value {
            debug!(
                "{} {} already {}, not writing",
                K::TABLE.name,
                set.name(),
                value
            );
            return Ok(());
        }

        let byte = if value { COMMAND_VALUE_ON } else { COMMAND_VALUE_OFF };
        info!("{} {} -> {}", K::TABLE.name, set.name(), value);
        self.send(&frame.with_byte(byte))
    }

    // === Motors ===

    /// Set one motor's power, -255 (full reverse) to 255 (full forward)
    pub fn set_motor(&mut self, channel: u8, power: i16) -> Result<()> {
        self.address()?;
        K::TABLE.check_channel(channel)?;
        let (direction, magnitude) = encode_power(power)?;
        let frame = self
            .command(Operation::SetMotor { channel, direction })?
            .with_byte(magnitude);
        debug!("Setting {} motor {} to {}", K::TABLE.name, channel, power);
        self.send(&frame)
    }

    /// Read back one motor's power
    pub fn get_motor(&self, channel: u8) -> Result<i16> {
        let address = self.address()?;
        K::TABLE.check_channel(channel)?;
        let power = self.query(Operation::GetMotor { channel })?.power(address.get())?;
        debug!("{} motor {} reports {}", K::TABLE.name, channel, power);
        Ok(power)
    }

    /// Set every motor to the same power with a single command
    pub fn set_all_motors(&mut self, power: i16) -> Result<()> {
        self.address()?;
        let (direction, magnitude) = encode_power(power)?;
        let frame = self
            .command(Operation::SetAllMotors { direction })?
            .with_byte(magnitude);
        debug!("Setting all {} motors to {}", K::TABLE.name, power);
        self.send(&frame)
    }

    /// Stop all motors with the board's dedicated all-off command
    pub fn all_stop(&mut self) -> Result<()> {
        let frame = self.command(Operation::AllOff)?;
        info!("{} all stop", K::TABLE.name);
        self.send(&frame)
    }

    // === Settings ===

    /// Enable or disable the communications failsafe.
    ///
    /// With the failsafe on the board stops its motors unless it hears from
    /// the host at least every quarter second.
    pub fn set_failsafe(&mut self, enabled: bool) -> Result<()> {
        self.set_flag(Operation::GetFailsafe, Operation::SetFailsafe, enabled)
    }

    pub fn get_failsafe(&self) -> Result<bool> {
        self.get_flag(Operation::GetFailsafe)
    }

    /// Clear a tripped EPO latch so the motors may move again
    pub fn reset_epo(&mut self) -> Result<()> {
        let frame = self.command(Operation::ResetEpo)?;
        info!("Resetting {} EPO latch", K::TABLE.name);
        self.send(&frame)
    }

    /// True when the EPO latch has tripped
    pub fn get_epo(&self) -> Result<bool> {
        self.get_flag(Operation::GetEpo)
    }

    /// Ignore the EPO input (for boards wired without an EPO switch)
    pub fn set_epo_ignore(&mut self, ignore: bool) -> Result<()> {
        self.set_flag(Operation::GetEpoIgnore, Operation::SetEpoIgnore, ignore)
    }

    pub fn get_epo_ignore(&self) -> Result<bool> {
        self.get_flag(Operation::GetEpoIgnore)
    }

    /// Device ID byte reported by the bound board
    pub fn board_id(&self) -> Result<u8> {
        let link = self.link()?;
        let response = link.query(&CommandFrame::new(COMMAND_GET_ID))?;
        Ok(response.byte(1))
    }
}

impl<P: BusProvider> Board<ThunderBorg, P> {
    pub fn set_led(&mut self, led: u8, colour: Rgb) -> Result<()> {
        check_led(led)?;
        let frame = self
            .command(Operation::SetLedColour { led })?
            .with_bytes(&[colour.red, colour.green, colour.blue]);
        debug!("Setting ThunderBorg LED {} to {:?}", led, colour);
        self.send(&frame)
    }

    pub fn get_led(&self, led: u8) -> Result<Rgb> {
        check_led(led)?;
        let response = self.query(Operation::GetLedColour { led })?;
        Ok(Rgb::new(response.byte(1), response.byte(2), response.byte(3)))
    }

    /// Set both LEDs at once
    pub fn set_leds(&mut self, colour: Rgb) -> Result<()> {
        let frame = self
            .command(Operation::SetLeds)?
            .with_bytes(&[colour.red, colour.green, colour.blue]);
        self.send(&frame)
    }

    /// Let the LEDs show battery level (red at minimum, green at maximum)
    pub fn set_battery_monitoring(&mut self, enabled: bool) -> Result<()> {
        self.set_flag(
            Operation::GetBatteryMonitor,
            Operation::SetBatteryMonitor,
            enabled,
        )
    }

    pub fn get_battery_monitoring(&self) -> Result<bool> {
        self.get_flag(Operation::GetBatteryMonitor)
    }

    /// Supply voltage in volts, rounded to 10 mV
    pub fn battery_voltage(&self) -> Result<f32> {
        let raw = self.query(Operation::GetBatteryVoltage)?.word();
        let volts = (raw as f32 / COMMAND_ANALOG_MAX) * VOLTAGE_PIN_MAX + VOLTAGE_PIN_CORRECTION;
        Ok(round_centi(volts))
    }

    /// Battery monitor (minimum, maximum) in volts
    pub fn battery_limits(&self) -> Result<(f32, f32)> {
        let response = self.query(Operation::GetBatteryLimits)?;
        Ok((
            level_to_volts(response.byte(1)),
            level_to_volts(response.byte(2)),
        ))
    }

    /// True when the motor driver for `channel` reports a fault
    pub fn drive_fault(&self, channel: u8) -> Result<bool> {
        self.table().check_channel(channel)?;
        self.get_flag(Operation::GetDriveFault { channel })
    }

    /// Snapshot the board's persistent settings
    pub fn read_settings(&self) -> Result<ThunderBorgSettings> {
        let address = self.address()?;
        let (battery_min, battery_max) = self.battery_limits()?;
        Ok(ThunderBorgSettings {
            board_address: address.get(),
            voltage_pin_max: VOLTAGE_PIN_MAX,
            battery_min,
            battery_max,
            led1: self.get_led(1)?,
            led2: self.get_led(2)?,
            battery_monitoring: self.get_battery_monitoring()?,
            failsafe: self.get_failsafe()?,
        })
    }

    /// Push a settings snapshot back onto the board.
    ///
    /// Motors are stopped first. The snapshot must have been taken from a
    /// board at the same address.
    pub fn apply_settings(&mut self, settings: &ThunderBorgSettings) -> Result<()> {
        self.all_stop()?;

        let address = self.address()?;
        if address.get() != settings.board_address {
            warn!(
                "Settings are for 0x{:02X} but this board is at {}",
                settings.board_address, address
            );
            return Err(BorgError::AddressMismatch {
                expected: settings.board_address,
                actual: address.get(),
            });
        }

        self.set_battery_limits(settings.battery_min, settings.battery_max)?;
        self.set_led(1, settings.led1)?;
        self.set_led(2, settings.led2)?;
        self.set_battery_monitoring(settings.battery_monitoring)?;
        self.set_failsafe(settings.failsafe)?;
        info!("Applied settings to ThunderBorg at {}", address);
        Ok(())
    }
}

impl<P: BusProvider> Board<ZeroBorg, P> {
    pub fn set_led(&mut self, on: bool) -> Result<()> {
        let byte = if on { COMMAND_VALUE_ON } else { COMMAND_VALUE_OFF };
        let frame = self.command(Operation::SetLed)?.with_byte(byte);
        self.send(&frame)
    }

    pub fn get_led(&self) -> Result<bool> {
        self.get_flag(Operation::GetLed)
    }

    /// Whether the LED mirrors IR receiver activity
    pub fn set_ir_led(&mut self, on: bool) -> Result<()> {
        let byte = if on { COMMAND_VALUE_ON } else { COMMAND_VALUE_OFF };
        let frame = self.command(Operation::SetIrLed)?.with_byte(byte);
        self.send(&frame)
    }

    pub fn get_ir_led(&self) -> Result<bool> {
        self.get_flag(Operation::GetIrLed)
    }

    /// True if an IR message arrived since the last read
    pub fn has_new_ir_message(&self) -> Result<bool> {
        self.get_flag(Operation::GetNewIr)
    }

    /// Voltage on analog input 1 or 2
    pub fn analog(&self, channel: u8) -> Result<f32> {
        if !(1..=2).contains(&channel) {
            return Err(BorgError::OutOfRange {
                what: "analog channel",
                value: channel as i64,
                min: 1,
                max: 2,
            });
        }
        let raw = self.query(Operation::GetAnalog { channel })?.word();
        Ok((raw as f32 / COMMAND_ANALOG_MAX) * ANALOG_PIN_MAX)
    }
}

impl<P: BusProvider> Board<Diabolo, P> {
    fn unsupported<T>(operation: &'static str) -> Result<T> {
        Err(BorgError::Unsupported {
            board: "Diabolo",
            operation,
        })
    }

    pub fn set_encoder_move_mode(&mut self, _enabled: bool) -> Result<()> {
        Self::unsupported("encoder move mode")
    }

    pub fn get_encoder_move_mode(&self) -> Result<bool> {
        Self::unsupported("encoder move mode")
    }

    pub fn encoder_move_motor(&mut self, _channel: u8, _steps: i16) -> Result<()> {
        Self::unsupported("encoder move")
    }

    pub fn encoder_move_all_motors(&mut self, _steps: i16) -> Result<()> {
        Self::unsupported("encoder move")
    }

    pub fn is_encoder_moving(&self) -> Result<bool> {
        Self::unsupported("encoder movement check")
    }

    pub fn set_encoder_speed(&mut self, _power: u8) -> Result<()> {
        Self::unsupported("encoder speed")
    }

    pub fn get_encoder_speed(&self) -> Result<u8> {
        Self::unsupported("encoder speed")
    }

    pub fn set_power_enabled(&mut self, _enabled: bool) -> Result<()> {
        Self::unsupported("power enable")
    }

    pub fn get_power_enabled(&self) -> Result<bool> {
        Self::unsupported("power enable")
    }
}

/// Battery monitor limit byte to volts
pub fn level_to_volts(level: u8) -> f32 {
    round_centi(level as f32 / 255.0 * VOLTAGE_PIN_MAX)
}

/// Volts to the byte the board stores for a battery monitor limit
pub fn volts_to_level(volts: f32) -> u8 {
    (volts / VOLTAGE_PIN_MAX * 255.0).round().clamp(0.0, 255.0) as u8
}

/// ThunderBorg LEDs are numbered 1 and 2
fn check_led(led: u8) -> Result<()> {
    if !(1..=2).contains(&led) {
        return Err(BorgError::OutOfRange {
            what: "LED",
            value: led as i64,
            min: 1,
            max: 2,
        });
    }
    Ok(())
}

fn round_centi(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}
