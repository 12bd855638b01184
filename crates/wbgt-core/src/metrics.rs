//! Heat-stress metrics derived from a sensor snapshot
//!
//! All functions are pure and work in degrees Celsius. Humidity is relative
//! humidity in percent, pressure is in hectopascals.

use libm::{expf, logf};
use thiserror_no_std::Error;

use crate::sensors::SensorSnapshot;

// Magnus coefficients (Sonntag 1990), valid roughly -45..60 °C
const MAGNUS_A: f32 = 17.62;
const MAGNUS_B: f32 = 243.12;

// Tetens saturation vapour pressure, kPa
const TETENS_E0: f32 = 0.6108;
const TETENS_A: f32 = 17.27;
const TETENS_B: f32 = 237.3;

/// Psychrometer constant per kPa of station pressure
const PSYCHROMETER_COEFF: f32 = 0.000_66;

/// Outdoor WBGT weights
const WBGT_WET_BULB_WEIGHT: f32 = 0.7;
const WBGT_GLOBE_WEIGHT: f32 = 0.2;
const WBGT_DRY_WEIGHT: f32 = 0.1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricError {
    #[error("MetricUnavailable")]
    MetricUnavailable,
    #[error("relative humidity must be above 0%")]
    HumidityOutOfRange,
}

/// Clamp humidity into `(0, 100]`, rejecting values that cannot be clamped.
fn checked_humidity(relative_humidity_pct: f32) -> Result<f32, MetricError> {
    if !relative_humidity_pct.is_finite() || relative_humidity_pct <= 0.0 {
        return Err(MetricError::HumidityOutOfRange);
    }
    Ok(relative_humidity_pct.min(100.0))
}

/// Dewpoint by the Magnus approximation.
pub fn dewpoint(dry_c: f32, relative_humidity_pct: f32) -> Result<f32, MetricError> {
    let rh = checked_humidity(relative_humidity_pct)?;
    let gamma = logf(rh / 100.0) + MAGNUS_A * dry_c / (MAGNUS_B + dry_c);
    Ok(MAGNUS_B * gamma / (MAGNUS_A - gamma))
}

/// Psychrometric wet-bulb temperature.
///
/// Linearizes the saturation curve at the dewpoint and solves the
/// psychrometer equation `e_w - e_d = γ (T - T_w)` for `T_w`.
pub fn wet_bulb(dry_c: f32, relative_humidity_pct: f32, pressure_hpa: f32) -> Result<f32, MetricError> {
    let dew_c = dewpoint(dry_c, relative_humidity_pct)?;

    let vapour_kpa = TETENS_E0 * expf(TETENS_A * dew_c / (dew_c + TETENS_B));
    let slope = 4098.0 * vapour_kpa / ((dew_c + TETENS_B) * (dew_c + TETENS_B));
    let gamma = PSYCHROMETER_COEFF * (pressure_hpa / 10.0);

    Ok((gamma * dry_c + slope * dew_c) / (gamma + slope))
}

/// Outdoor wet-bulb globe temperature.
pub fn wbgt(globe_c: f32, wet_bulb_c: f32, dry_c: f32) -> f32 {
    WBGT_WET_BULB_WEIGHT * wet_bulb_c + WBGT_GLOBE_WEIGHT * globe_c + WBGT_DRY_WEIGHT * dry_c
}

/// Derived metrics for one snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatStressResult {
    pub dewpoint_c: f32,
    pub wet_bulb_c: f32,
    /// `None` when the globe probe did not report.
    pub wbgt: Option<f32>,
}

impl HeatStressResult {
    pub fn from_snapshot(snapshot: &SensorSnapshot) -> Result<Self, MetricError> {
        let dewpoint_c = dewpoint(snapshot.dry_temperature_c, snapshot.relative_humidity_pct)?;
        let wet_bulb_c = wet_bulb(
            snapshot.dry_temperature_c,
            snapshot.relative_humidity_pct,
            snapshot.pressure_hpa,
        )?;
        let wbgt = snapshot
            .globe_temperature_c
            .map(|globe_c| wbgt(globe_c, wet_bulb_c, snapshot.dry_temperature_c));

        Ok(Self {
            dewpoint_c,
            wet_bulb_c,
            wbgt,
        })
    }

    pub fn wbgt(&self) -> Result<f32, MetricError> {
        self.wbgt.ok_or(MetricError::MetricUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f32, expected: f32, tolerance: f32) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} ± {tolerance}, got {actual}"
        );
    }

    #[test]
    fn test_wbgt_weights() {
        assert_close(wbgt(30.0, 25.0, 28.0), 26.3, 1e-4);
        assert_close(wbgt(0.0, 0.0, 0.0), 0.0, 1e-6);
    }

    #[test]
    fn test_dewpoint_at_saturation() {
        for t in [-10.0, 0.0, 12.5, 25.0, 40.0] {
            assert_close(dewpoint(t, 100.0).unwrap(), t, 1e-3);
        }
    }

    #[test]
    fn test_dewpoint_reference_value() {
        assert_close(dewpoint(30.0, 50.0).unwrap(), 18.44, 0.02);
        assert!(dewpoint(25.0, 30.0).unwrap() < dewpoint(25.0, 60.0).unwrap());
    }

    #[test]
    fn test_wet_bulb_between_dewpoint_and_dry() {
        let wb = wet_bulb(30.0, 50.0, 1013.25).unwrap();
        assert!(wb > 21.8 && wb < 22.8, "wet bulb {wb}");
        assert!(wb > dewpoint(30.0, 50.0).unwrap());
        assert!(wb < 30.0);
    }

    #[test]
    fn test_wet_bulb_at_saturation() {
        assert_close(wet_bulb(22.0, 100.0, 1000.0).unwrap(), 22.0, 1e-3);
    }

    #[test]
    fn test_humidity_range() {
        assert_eq!(dewpoint(20.0, 0.0), Err(MetricError::HumidityOutOfRange));
        assert_eq!(dewpoint(20.0, -5.0), Err(MetricError::HumidityOutOfRange));
        assert_eq!(
            wet_bulb(20.0, f32::NAN, 1013.0),
            Err(MetricError::HumidityOutOfRange)
        );
        assert_eq!(dewpoint(20.0, 104.0).unwrap(), dewpoint(20.0, 100.0).unwrap());
    }

    #[test]
    fn test_result_without_globe_probe() {
        let snapshot = SensorSnapshot {
            dry_temperature_c: 30.0,
            relative_humidity_pct: 50.0,
            pressure_hpa: 1013.25,
            globe_temperature_c: None,
            solar_radiation_wm2: 450.0,
        };
        let result = HeatStressResult::from_snapshot(&snapshot).unwrap();

        assert_close(result.dewpoint_c, 18.44, 0.02);
        assert_eq!(result.wbgt(), Err(MetricError::MetricUnavailable));
    }

    #[test]
    fn test_result_with_globe_probe() {
        let snapshot = SensorSnapshot {
            dry_temperature_c: 30.0,
            relative_humidity_pct: 50.0,
            pressure_hpa: 1013.25,
            globe_temperature_c: Some(40.0),
            solar_radiation_wm2: 450.0,
        };
        let result = HeatStressResult::from_snapshot(&snapshot).unwrap();

        let expected = 0.7 * result.wet_bulb_c + 0.2 * 40.0 + 0.1 * 30.0;
        assert_close(result.wbgt().unwrap(), expected, 1e-4);
    }
}
