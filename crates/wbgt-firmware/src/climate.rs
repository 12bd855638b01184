//! BME280 climate sensor (temperature, humidity, pressure)

use bme280::i2c::AsyncBME280;
use embedded_hal_async::i2c::I2c;
use log::{error, info};
use wbgt_core::sensors::{ClimateReadings, Sensor, SensorError};

const SENSOR: &str = "BME280";

pub struct Bme280Sensor<I> {
    sensor: AsyncBME280<I>,
    calibrated: bool,
}

impl<I: I2c> Bme280Sensor<I> {
    /// Sensor at the primary address (0x76).
    pub fn new(i2c: I) -> Self {
        Self {
            sensor: AsyncBME280::new_primary(i2c),
            calibrated: false,
        }
    }

    /// Load the calibration data and start sampling.
    pub async fn init(&mut self) -> Result<(), SensorError> {
        self.sensor
            .init(&mut embassy_time::Delay)
            .await
            .map_err(|e| {
                error!("BME280 init failed: {:?}", e);
                SensorError::SensorNotReady { sensor: SENSOR }
            })?;
        self.calibrated = true;
        info!("BME280 ready");
        Ok(())
    }
}

impl<I: I2c> Sensor for Bme280Sensor<I> {
    type Readings = ClimateReadings;

    async fn read(&mut self) -> Result<ClimateReadings, SensorError> {
        // A sensor that missed boot (loose cable) gets another chance here.
        if !self.calibrated {
            self.init().await?;
        }

        let measurement = match self.sensor.measure(&mut embassy_time::Delay).await {
            Ok(measurement) => measurement,
            Err(e) => {
                error!("BME280 measurement failed: {:?}", e);
                self.calibrated = false;
                return Err(SensorError::BusError {
                    sensor: SENSOR,
                    details: "I2C communication error or sensor not responding",
                });
            }
        };

        Ok(ClimateReadings {
            temperature_c: measurement.temperature,
            humidity_pct: measurement.humidity,
            pressure_hpa: measurement.pressure / 100.0,
        })
    }
}
