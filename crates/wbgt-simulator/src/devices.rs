//! Stand-ins for the board peripherals: sensors, radio, button and delay.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use embedded_hal::digital::{ErrorType, InputPin};
use embedded_hal_async::delay::DelayNs;
use log::info;
use wbgt_core::link::{AccessPointConfig, NetworkError, NetworkLink, StationConfig};
use wbgt_core::sensors::{ClimateReadings, ProbeReadings, Sensor, SensorError};

// ---------------------------------------------------------------------------
// Mock sensors
// ---------------------------------------------------------------------------

/// Synthetic summer-afternoon climate at `t` seconds after start.
pub fn climate_at(t: f64) -> ClimateReadings {
    // Temperature: 24–32 °C with slow drift
    let temperature = 28.0 + 3.5 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos();

    // Humidity: 43–67 % on a different period
    let humidity = 55.0 + 10.0 * (t / 180.0).sin() + 2.0 * (t / 23.0).cos();

    // Pressure: gentle swell around standard atmosphere
    let pressure = 1013.25 + 2.0 * (t / 600.0).sin();

    ClimateReadings {
        temperature_c: temperature as f32,
        humidity_pct: humidity as f32,
        pressure_hpa: pressure as f32,
    }
}

/// Synthetic black-globe temperature: air temperature plus a radiant load.
pub fn globe_at(t: f64) -> ProbeReadings {
    let radiant = 6.0 + 2.0 * (t / 90.0).sin();
    ProbeReadings {
        globe_temperature_c: climate_at(t).temperature_c + radiant as f32,
    }
}

pub struct MockClimate {
    started: Instant,
}

impl MockClimate {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Sensor for MockClimate {
    type Readings = ClimateReadings;

    async fn read(&mut self) -> Result<ClimateReadings, SensorError> {
        Ok(climate_at(self.started.elapsed().as_secs_f64()))
    }
}

pub struct MockGlobe {
    started: Instant,
}

impl MockGlobe {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Sensor for MockGlobe {
    type Readings = ProbeReadings;

    async fn read(&mut self) -> Result<ProbeReadings, SensorError> {
        Ok(globe_at(self.started.elapsed().as_secs_f64()))
    }
}

// ---------------------------------------------------------------------------
// Radio, button, delay
// ---------------------------------------------------------------------------

/// Pretend radio. Association succeeds after a few polls, or never.
pub struct SimulatedLink {
    associate_after_polls: Option<u32>,
    polls: u32,
    joining: bool,
}

impl SimulatedLink {
    pub fn new(associate_after_polls: Option<u32>) -> Self {
        Self {
            associate_after_polls,
            polls: 0,
            joining: false,
        }
    }
}

impl NetworkLink for SimulatedLink {
    async fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), NetworkError> {
        info!(
            "[radio] access point \"{}\" at {}/{}",
            config.ssid, config.address, config.prefix_len
        );
        Ok(())
    }

    async fn begin_join(&mut self, config: &StationConfig) -> Result<(), NetworkError> {
        info!(
            "[radio] associating with \"{}\" ({})",
            config.ssid,
            if config.static_ipv4.is_some() {
                "static IPv4"
            } else {
                "DHCP"
            }
        );
        self.joining = true;
        self.polls = 0;
        Ok(())
    }

    fn is_associated(&mut self) -> bool {
        if !self.joining {
            return false;
        }
        self.polls += 1;
        self.associate_after_polls
            .is_some_and(|needed| self.polls >= needed)
    }
}

/// Provisioning button fixed for the whole run.
pub struct SimulatedButton {
    held: bool,
}

impl SimulatedButton {
    pub fn new(held: bool) -> Self {
        Self { held }
    }
}

impl ErrorType for SimulatedButton {
    type Error = Infallible;
}

impl InputPin for SimulatedButton {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(!self.held)
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(self.held)
    }
}

/// Blocking delay; the simulator runs one boot future on the main thread.
pub struct StdDelay;

impl DelayNs for StdDelay {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use wbgt_core::config::Secret;

    fn station() -> StationConfig {
        StationConfig {
            ssid: String::from("WLAN_XXX"),
            password: Secret::new("123456*"),
            static_ipv4: None,
        }
    }

    #[test]
    fn test_mock_readings_are_plausible() {
        for t in (0..3_600).step_by(7) {
            let climate = climate_at(f64::from(t));
            assert!((24.0..=32.0).contains(&climate.temperature_c));
            assert!((43.0..=67.0).contains(&climate.humidity_pct));
            assert!((1011.0..=1016.0).contains(&climate.pressure_hpa));

            let globe = globe_at(f64::from(t));
            assert!(globe.globe_temperature_c > climate.temperature_c);
        }
    }

    #[test]
    fn test_link_associates_after_polls() {
        let mut link = SimulatedLink::new(Some(3));
        assert!(!link.is_associated());

        block_on(link.begin_join(&station())).unwrap();
        assert!(!link.is_associated());
        assert!(!link.is_associated());
        assert!(link.is_associated());
    }

    #[test]
    fn test_unreachable_link_never_associates() {
        let mut link = SimulatedLink::new(None);
        block_on(link.begin_join(&station())).unwrap();
        assert!((0..100).all(|_| !link.is_associated()));
    }

    #[test]
    fn test_button_levels() {
        let mut held = SimulatedButton::new(true);
        assert!(held.is_low().unwrap());
        let mut released = SimulatedButton::new(false);
        assert!(released.is_high().unwrap());
    }
}
