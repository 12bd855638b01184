//! Sensor traits and the snapshot aggregator
//!
//! Drivers live behind [`Sensor`]; the aggregator serializes access to them
//! (the sensor buses are not reentrant) and assembles one [`SensorSnapshot`]
//! per request.

pub mod max31865;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use log::{debug, warn};
use thiserror_no_std::Error;

pub use max31865::Max31865;

/// Solar radiation is not measured; dashboards expect this constant.
pub const SOLAR_RADIATION_PLACEHOLDER_WM2: f32 = 450.0;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: bus error ({details})")]
    BusError {
        sensor: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: sensor not ready")]
    SensorNotReady { sensor: &'static str },
    #[error("globe temperature probe absent")]
    ProbeAbsent,
}

/// Trait for sensors that produce typed readings.
pub trait Sensor {
    type Readings;

    fn read(&mut self) -> impl Future<Output = Result<Self::Readings, SensorError>>;
}

/// Temperature, humidity and pressure from the climate chip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReadings {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub pressure_hpa: f32,
}

/// Black-globe probe temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReadings {
    pub globe_temperature_c: f32,
}

/// One gathering of raw physical readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    pub dry_temperature_c: f32,
    pub relative_humidity_pct: f32,
    pub pressure_hpa: f32,
    pub globe_temperature_c: Option<f32>,
    pub solar_radiation_wm2: f32,
}

/// Stand-in for builds without a globe probe.
pub struct NoProbe;

impl Sensor for NoProbe {
    type Readings = ProbeReadings;

    async fn read(&mut self) -> Result<ProbeReadings, SensorError> {
        Err(SensorError::ProbeAbsent)
    }
}

struct SensorBank<C, P> {
    climate: Option<C>,
    probe: Option<P>,
}

/// Shared front for the climate sensor and the globe probe.
///
/// `None` for a sensor means its bus probe failed at boot; reads then
/// report [`SensorError::SensorNotReady`] (climate) or the globe field is
/// omitted (probe).
pub struct SensorAggregator<C, P> {
    bank: Mutex<CriticalSectionRawMutex, SensorBank<C, P>>,
}

impl<C, P> SensorAggregator<C, P>
where
    C: Sensor<Readings = ClimateReadings>,
    P: Sensor<Readings = ProbeReadings>,
{
    pub fn new(climate: Option<C>, probe: Option<P>) -> Self {
        Self {
            bank: Mutex::new(SensorBank { climate, probe }),
        }
    }

    /// Full snapshot. A probe failure only clears `globe_temperature_c`.
    ///
    /// A climate failure fails the whole snapshot and the probe is not read,
    /// since every other snapshot field comes from the climate sensor.
    pub async fn sample(&self) -> Result<SensorSnapshot, SensorError> {
        let mut bank = self.bank.lock().await;

        let climate = read_climate(&mut bank.climate).await?;

        let globe_temperature_c = match bank.probe.as_mut() {
            Some(probe) => match probe.read().await {
                Ok(readings) => Some(readings.globe_temperature_c),
                Err(SensorError::ProbeAbsent) => {
                    debug!("Globe probe not connected");
                    None
                }
                Err(e) => {
                    warn!("Globe probe read failed: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(SensorSnapshot {
            dry_temperature_c: climate.temperature_c,
            relative_humidity_pct: climate.humidity_pct,
            pressure_hpa: climate.pressure_hpa,
            globe_temperature_c,
            solar_radiation_wm2: SOLAR_RADIATION_PLACEHOLDER_WM2,
        })
    }

    /// Climate triplet only; the probe is left untouched.
    pub async fn sample_climate(&self) -> Result<ClimateReadings, SensorError> {
        let mut bank = self.bank.lock().await;
        read_climate(&mut bank.climate).await
    }
}

async fn read_climate<C>(climate: &mut Option<C>) -> Result<ClimateReadings, SensorError>
where
    C: Sensor<Readings = ClimateReadings>,
{
    let Some(sensor) = climate.as_mut() else {
        return Err(SensorError::SensorNotReady { sensor: "climate" });
    };
    sensor.read().await.inspect_err(|e| warn!("Climate read failed: {}", e))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use alloc::collections::VecDeque;

    /// Climate sensor that replays scripted results, then repeats the last one.
    pub struct ScriptedClimate {
        results: VecDeque<Result<ClimateReadings, SensorError>>,
    }

    impl ScriptedClimate {
        pub fn steady(temperature_c: f32, humidity_pct: f32, pressure_hpa: f32) -> Self {
            Self::script([Ok(ClimateReadings {
                temperature_c,
                humidity_pct,
                pressure_hpa,
            })])
        }

        pub fn failing(error: SensorError) -> Self {
            Self::script([Err(error)])
        }

        pub fn script<const N: usize>(
            results: [Result<ClimateReadings, SensorError>; N],
        ) -> Self {
            Self {
                results: results.into_iter().collect(),
            }
        }
    }

    impl Sensor for ScriptedClimate {
        type Readings = ClimateReadings;

        async fn read(&mut self) -> Result<ClimateReadings, SensorError> {
            if self.results.len() > 1 {
                self.results.pop_front().unwrap()
            } else {
                *self.results.front().unwrap()
            }
        }
    }

    pub struct FixedProbe(pub Result<f32, SensorError>);

    impl Sensor for FixedProbe {
        type Readings = ProbeReadings;

        async fn read(&mut self) -> Result<ProbeReadings, SensorError> {
            self.0.map(|globe_temperature_c| ProbeReadings {
                globe_temperature_c,
            })
        }
    }
}
