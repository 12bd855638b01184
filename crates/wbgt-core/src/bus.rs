//! Sensor I2C bus and its two tenants
//!
//! The BME280 and the identity EEPROM share one I2C peripheral. The bus lives
//! in an async mutex and each tenant gets an `embassy-embedded-hal` device
//! handle that locks it per transaction.

use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;

pub type I2cBus<T> = Mutex<CriticalSectionRawMutex, T>;
pub type SharedI2c<'a, T> = I2cDevice<'a, CriticalSectionRawMutex, T>;

/// Handles for everything on the sensor bus.
pub struct SensorBus<'a, T> {
    /// BME280 at 0x76
    pub climate: SharedI2c<'a, T>,
    /// Chip-ID EEPROM at 0x50, read once at boot
    pub identity: SharedI2c<'a, T>,
}

impl<'a, T> SensorBus<'a, T> {
    pub fn split(bus: &'a I2cBus<T>) -> Self {
        Self {
            climate: I2cDevice::new(bus),
            identity: I2cDevice::new(bus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IDENTITY_EEPROM_ADDR, read_identity};
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use embedded_hal_async::i2c::{ErrorType, I2c, Operation};

    /// Records the address of every transaction and answers reads with a
    /// byte pattern derived from it.
    #[derive(Default)]
    struct RecordingBus {
        addresses: Vec<u8>,
    }

    impl ErrorType for RecordingBus {
        type Error = Infallible;
    }

    impl I2c for RecordingBus {
        async fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Infallible> {
            self.addresses.push(address);
            for op in operations.iter_mut() {
                if let Operation::Read(buf) = op {
                    for (i, byte) in buf.iter_mut().enumerate() {
                        *byte = address.wrapping_add(i as u8);
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_tenants_share_one_bus() {
        let bus = I2cBus::new(RecordingBus::default());
        let SensorBus {
            mut climate,
            mut identity,
        } = SensorBus::split(&bus);

        let mut calib = [0u8; 2];
        block_on(climate.write_read(0x76, &[0x88], &mut calib)).unwrap();
        assert_eq!(calib, [0x76, 0x77]);

        let id = block_on(read_identity(&mut identity)).unwrap();
        assert_eq!(id.as_str(), "515253545556");

        assert_eq!(
            bus.into_inner().addresses,
            vec![0x76, IDENTITY_EEPROM_ADDR]
        );
    }
}
