//! MAX31865 RTD-to-digital converter driver (PT100 globe probe)
//!
//! One-shot conversions over SPI mode 1 or 3. Bias is enabled only around a
//! conversion to limit self-heating of the probe.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::{Operation, SpiDevice};
use libm::sqrtf;
use log::{debug, error, warn};

use super::{ProbeReadings, Sensor, SensorError};

// ============================================================================
// Registers
// ============================================================================

const REG_CONFIG: u8 = 0x00;
const REG_RTD_MSB: u8 = 0x01;
const REG_FAULT_STATUS: u8 = 0x07;

const WRITE_FLAG: u8 = 0x80;

const CONFIG_VBIAS: u8 = 0x80;
const CONFIG_ONE_SHOT: u8 = 0x20;
const CONFIG_THREE_WIRE: u8 = 0x10;
const CONFIG_FAULT_CLEAR: u8 = 0x02;
const CONFIG_FILTER_50HZ: u8 = 0x01;

/// RTD high/low threshold faults; an open or shorted probe trips these.
const FAULT_THRESHOLD_MASK: u8 = 0xC0;

// ============================================================================
// Conversion constants
// ============================================================================

/// Reference resistor on the breakout board
pub const REFERENCE_OHMS: f32 = 430.0;
/// PT100 nominal resistance at 0 °C
pub const NOMINAL_OHMS: f32 = 100.0;

// Callendar-Van Dusen coefficients (IEC 60751)
const CVD_A: f32 = 3.9083e-3;
const CVD_B: f32 = -5.775e-7;

const BIAS_SETTLE_MS: u32 = 10;
/// Conversion time with the 50 Hz filter selected
const CONVERSION_MS: u32 = 66;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wiring {
    TwoWire,
    ThreeWire,
    FourWire,
}

/// Convert an RTD resistance to °C.
///
/// Inverse Callendar-Van Dusen above 0 °C, polynomial fit below.
pub fn resistance_to_celsius(resistance: f32) -> f32 {
    let z1 = -CVD_A;
    let z2 = CVD_A * CVD_A - 4.0 * CVD_B;
    let z3 = 4.0 * CVD_B / NOMINAL_OHMS;
    let z4 = 2.0 * CVD_B;

    let temp = (z1 + sqrtf(z2 + z3 * resistance)) / z4;
    if temp >= 0.0 {
        return temp;
    }

    let r = resistance / NOMINAL_OHMS * 100.0;
    let mut rpoly = r;
    let mut temp = -242.02 + 2.2228 * rpoly;
    rpoly *= r;
    temp += 2.5859e-3 * rpoly;
    rpoly *= r;
    temp -= 4.8260e-6 * rpoly;
    rpoly *= r;
    temp -= 2.8183e-8 * rpoly;
    rpoly *= r;
    temp += 1.5243e-10 * rpoly;
    temp
}

pub struct Max31865<S, D> {
    spi: S,
    delay: D,
    base_config: u8,
}

impl<S, D> Max31865<S, D>
where
    S: SpiDevice,
    D: DelayNs,
{
    pub fn new(spi: S, delay: D, wiring: Wiring) -> Self {
        let mut base_config = CONFIG_FILTER_50HZ;
        if wiring == Wiring::ThreeWire {
            base_config |= CONFIG_THREE_WIRE;
        }
        Self {
            spi,
            delay,
            base_config,
        }
    }

    async fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.spi
            .write(&[register | WRITE_FLAG, value])
            .await
            .map_err(|e| {
                error!("MAX31865 write to {:#04x} failed: {:?}", register, e);
                SensorError::BusError {
                    sensor: "MAX31865",
                    details: "SPI write failed",
                }
            })
    }

    async fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        self.spi
            .transaction(&mut [Operation::Write(&[register]), Operation::Read(buf)])
            .await
            .map_err(|e| {
                error!("MAX31865 read from {:#04x} failed: {:?}", register, e);
                SensorError::BusError {
                    sensor: "MAX31865",
                    details: "SPI read failed",
                }
            })
    }

    /// Run one conversion and return the raw 15-bit RTD code.
    pub async fn read_raw(&mut self) -> Result<u16, SensorError> {
        self.write_register(REG_CONFIG, self.base_config | CONFIG_VBIAS)
            .await?;
        self.delay.delay_ms(BIAS_SETTLE_MS).await;

        self.write_register(
            REG_CONFIG,
            self.base_config | CONFIG_VBIAS | CONFIG_ONE_SHOT,
        )
        .await?;
        self.delay.delay_ms(CONVERSION_MS).await;

        let mut rtd = [0u8; 2];
        let read = self.read_registers(REG_RTD_MSB, &mut rtd).await;

        // Bias off even when the read failed.
        self.write_register(REG_CONFIG, self.base_config).await?;
        read?;

        let word = u16::from_be_bytes(rtd);
        if word & 0x0001 != 0 {
            return Err(self.handle_fault().await);
        }
        if word == 0x0000 {
            // MISO idle low: nothing answered on the bus.
            return Err(SensorError::ProbeAbsent);
        }
        Ok(word >> 1)
    }

    async fn handle_fault(&mut self) -> SensorError {
        let mut status = [0u8; 1];
        if let Err(e) = self.read_registers(REG_FAULT_STATUS, &mut status).await {
            return e;
        }
        if let Err(e) = self
            .write_register(REG_CONFIG, self.base_config | CONFIG_FAULT_CLEAR)
            .await
        {
            warn!("MAX31865 fault clear failed: {}", e);
        }

        debug!("MAX31865 fault status {:#04x}", status[0]);
        if status[0] & FAULT_THRESHOLD_MASK != 0 {
            SensorError::ProbeAbsent
        } else {
            SensorError::BusError {
                sensor: "MAX31865",
                details: "converter fault",
            }
        }
    }
}

impl<S, D> Sensor for Max31865<S, D>
where
    S: SpiDevice,
    D: DelayNs,
{
    type Readings = ProbeReadings;

    async fn read(&mut self) -> Result<ProbeReadings, SensorError> {
        let raw = self.read_raw().await?;
        let resistance = f32::from(raw) * REFERENCE_OHMS / 32768.0;
        Ok(ProbeReadings {
            globe_temperature_c: resistance_to_celsius(resistance),
        })
    }
}
