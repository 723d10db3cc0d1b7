// Bus access
//
// Boards never keep a bus open: each call asks the provider for a fresh handle
// and drops it when the transaction is done.

use embedded_hal::i2c::I2c;

use super::protocol::Result;

/// Opens a numbered I2C bus
pub trait BusProvider {
    type Bus: I2c;

    fn open(&self, bus: u8) -> Result<Self::Bus>;
}

impl<T: BusProvider> BusProvider for &T {
    type Bus = T::Bus;

    fn open(&self, bus: u8) -> Result<Self::Bus> {
        (**self).open(bus)
    }
}

/// Linux `/dev/i2c-N` character devices
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxI2c;

#[cfg(target_os = "linux")]
impl LinuxI2c {
    pub fn device_path(bus: u8) -> String {
        format!("/dev/i2c-{}", bus)
    }
}

#[cfg(target_os = "linux")]
impl BusProvider for LinuxI2c {
    type Bus = linux_embedded_hal::I2cdev;

    fn open(&self, bus: u8) -> Result<Self::Bus> {
        let path = Self::device_path(bus);
        linux_embedded_hal::I2cdev::new(&path).map_err(|e| super::protocol::BorgError::BusOpen {
            bus,
            reason: format!("{}: {}", path, e),
        })
    }
}
