//! Device identity from the factory-programmed ID EEPROM

use core::fmt;
use embedded_hal_async::i2c::I2c;
use heapless::String;
use log::{error, info};

/// 7-bit address of the identity EEPROM on the sensor bus
pub const IDENTITY_EEPROM_ADDR: u8 = 0x50;
/// Bytes read from offset 0 of the EEPROM
pub const CHIP_ID_LEN: usize = 9;
/// Length of the reference string
pub const IDENTITY_LEN: usize = 12;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// 12-character lowercase hex reference naming this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity(String<IDENTITY_LEN>);

impl DeviceIdentity {
    /// Derive the reference from a raw chip ID.
    ///
    /// The first byte is a family code and the last two carry CRC/serial
    /// tail, so the reference is the hex of bytes `1..7`.
    pub fn from_chip_id(raw: &[u8; CHIP_ID_LEN]) -> Self {
        let mut reference = String::new();
        for byte in &raw[1..7] {
            // Capacity is exactly 6 bytes * 2 digits.
            let _ = reference.push(char::from(HEX_DIGITS[usize::from(byte >> 4)]));
            let _ = reference.push(char::from(HEX_DIGITS[usize::from(byte & 0x0F)]));
        }
        Self(reference)
    }

    /// Placeholder used when the EEPROM does not answer.
    pub fn unknown() -> Self {
        Self::from_chip_id(&[0u8; CHIP_ID_LEN])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read the chip ID from the identity EEPROM.
pub async fn read_identity<I: I2c>(i2c: &mut I) -> Result<DeviceIdentity, I::Error> {
    let mut raw = [0u8; CHIP_ID_LEN];
    i2c.write_read(IDENTITY_EEPROM_ADDR, &[0x00], &mut raw)
        .await
        .inspect_err(|e| error!("Identity EEPROM read failed: {:?}", e))?;

    let identity = DeviceIdentity::from_chip_id(&raw);
    info!("Device identity: {}", identity);
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal_async::i2c::{ErrorKind, ErrorType, Operation};

    #[test]
    fn test_reference_from_chip_id() {
        let raw = [0xfa, 0x00, 0x04, 0xa3, 0x0b, 0x00, 0x1c, 0x2d, 0x3e];
        let identity = DeviceIdentity::from_chip_id(&raw);
        assert_eq!(identity.as_str(), "0004a30b001c");
        assert_eq!(identity.as_str().len(), IDENTITY_LEN);
    }

    #[test]
    fn test_unknown_identity() {
        assert_eq!(DeviceIdentity::unknown().as_str(), "000000000000");
    }

    struct Eeprom {
        contents: [u8; 16],
        present: bool,
    }

    impl ErrorType for Eeprom {
        type Error = ErrorKind;
    }

    impl I2c for Eeprom {
        async fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if !self.present || address != IDENTITY_EEPROM_ADDR {
                return Err(ErrorKind::Other);
            }
            let mut offset = 0usize;
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(bytes) => offset = usize::from(bytes[0]),
                    Operation::Read(buf) => {
                        let len = buf.len();
                        buf.copy_from_slice(&self.contents[offset..offset + len]);
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_read_identity_over_i2c() {
        let mut contents = [0u8; 16];
        contents[..9].copy_from_slice(&[0x70, 0xb3, 0xd5, 0x49, 0x90, 0x12, 0x34, 0xff, 0xff]);
        let mut eeprom = Eeprom {
            contents,
            present: true,
        };

        let identity = block_on(read_identity(&mut eeprom)).unwrap();
        assert_eq!(identity.as_str(), "b3d549901234");
    }

    #[test]
    fn test_read_identity_absent_chip() {
        let mut eeprom = Eeprom {
            contents: [0u8; 16],
            present: false,
        };
        assert!(block_on(read_identity(&mut eeprom)).is_err());
    }
}
