//! Telemetry and configuration routes
//!
//! Every request gets a 200 with a payload, even when a sensor or the store
//! fails: the dashboard polls these endpoints as an event stream and treats
//! the payload text as status.

use alloc::format;
use alloc::string::{String, ToString};
use log::{error, info, warn};
use rand_core::RngCore;
use serde::Serialize;

use crate::http::{Method, Request, Response, Status, content_type_for};
use crate::link::NetworkError;
use crate::metrics::{HeatStressResult, MetricError};
use crate::sensors::{ClimateReadings, ProbeReadings, Sensor, SensorAggregator};
use crate::settings::DeviceSettings;
use crate::storage::{SettingsStore, StorageError, StorageMedium};

/// Shown while the climate sensor has no reading to offer.
pub const SENSOR_PENDING_TEXT: &str = "Attempting to read sensor...";
pub const INVALID_READING_TEXT: &str = "Invalid reading.";
pub const SETTINGS_SAVED_TEXT: &str = "settings saved";

/// Root of the static web UI on the storage medium.
const WEB_ROOT: &str = "www";

#[derive(Serialize)]
struct DashboardFrame {
    t: f32,
    hr: f32,
    p: f32,
    sr: u16,
}

/// A derived value, or the marker string when it cannot be computed.
#[derive(Serialize)]
#[serde(untagged)]
enum Metric {
    Value(f32),
    Unavailable(&'static str),
}

impl Metric {
    fn unavailable() -> Self {
        Self::Unavailable("MetricUnavailable")
    }
}

impl From<Result<f32, MetricError>> for Metric {
    fn from(value: Result<f32, MetricError>) -> Self {
        match value {
            Ok(v) => Self::Value(v),
            Err(_) => Self::unavailable(),
        }
    }
}

#[derive(Serialize)]
struct WbgtFrame {
    t: f32,
    hr: f32,
    p: f32,
    #[serde(rename = "GlobeT")]
    globe_t: Metric,
    sr: u16,
    #[serde(rename = "WBGT")]
    wbgt: Metric,
    #[serde(rename = "Dewpoint")]
    dewpoint: Metric,
}

pub struct TelemetryService<'a, C, P, M, R> {
    sensors: &'a SensorAggregator<C, P>,
    store: &'a SettingsStore<M, R>,
}

impl<'a, C, P, M, R> TelemetryService<'a, C, P, M, R>
where
    C: Sensor<Readings = ClimateReadings>,
    P: Sensor<Readings = ProbeReadings>,
    M: StorageMedium,
    R: RngCore,
{
    pub fn new(sensors: &'a SensorAggregator<C, P>, store: &'a SettingsStore<M, R>) -> Self {
        Self { sensors, store }
    }

    pub async fn handle(&self, request: &Request) -> Response {
        match (request.method, request.path.as_str()) {
            (Method::Get, "/dht") => self.dht().await,
            (Method::Get, "/dashboard") => self.dashboard().await,
            (Method::Get, "/wbgt") => self.wbgt().await,
            (Method::Post, "/led") => self.led(&request.body),
            (Method::Post, "/globalsettings") => self.global_settings(&request.body).await,
            (Method::Get, path) => self.asset(path).await,
            _ => Response::text(Status::MethodNotAllowed, "method not allowed"),
        }
    }

    async fn dht(&self) -> Response {
        let climate = match self.sensors.sample_climate().await {
            Ok(climate) => climate,
            Err(e) => {
                warn!("/dht: {}", e);
                return Response::event(SENSOR_PENDING_TEXT);
            }
        };

        if !climate.temperature_c.is_finite() || !climate.humidity_pct.is_finite() {
            return Response::event(INVALID_READING_TEXT);
        }
        Response::event(&format!(
            "{:.1}°C {:.1}%",
            climate.temperature_c, climate.humidity_pct
        ))
    }

    async fn dashboard(&self) -> Response {
        let snapshot = match self.sensors.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("/dashboard: {}", e);
                return Response::event(SENSOR_PENDING_TEXT);
            }
        };

        let frame = DashboardFrame {
            t: snapshot.dry_temperature_c,
            hr: snapshot.relative_humidity_pct,
            p: snapshot.pressure_hpa,
            sr: snapshot.solar_radiation_wm2 as u16,
        };
        event_json(&frame)
    }

    async fn wbgt(&self) -> Response {
        let snapshot = match self.sensors.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("/wbgt: {}", e);
                return Response::event(&e.to_string());
            }
        };
        let (wbgt, dewpoint) = match HeatStressResult::from_snapshot(&snapshot) {
            Ok(metrics) => (metrics.wbgt().into(), Metric::Value(metrics.dewpoint_c)),
            Err(e) => {
                warn!("/wbgt: {}", e);
                (Metric::unavailable(), Metric::unavailable())
            }
        };

        let frame = WbgtFrame {
            t: snapshot.dry_temperature_c,
            hr: snapshot.relative_humidity_pct,
            p: snapshot.pressure_hpa,
            globe_t: snapshot
                .globe_temperature_c
                .ok_or(MetricError::MetricUnavailable)
                .into(),
            sr: snapshot.solar_radiation_wm2 as u16,
            wbgt,
            dewpoint,
        };
        event_json(&frame)
    }

    fn led(&self, body: &[u8]) -> Response {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(colors) => {
                info!("colors {}", colors);
                Response::text(Status::Ok, "ok")
            }
            Err(e) => {
                warn!("/led: malformed colour payload: {}", e);
                Response::text(Status::Ok, "malformed colour payload")
            }
        }
    }

    async fn global_settings(&self, body: &[u8]) -> Response {
        let settings = match DeviceSettings::from_json(body) {
            Ok(settings) => settings,
            Err(e) => {
                let error = NetworkError::ConfigInvalid(e);
                warn!("/globalsettings: {}", error);
                return Response::text(Status::Ok, &error.to_string());
            }
        };

        match self.store.save(&settings).await {
            Ok(()) => {
                info!("New settings stored: {:?}", settings);
                Response::text(Status::Ok, SETTINGS_SAVED_TEXT)
            }
            Err(e) => {
                error!("/globalsettings: save failed: {}", e);
                Response::text(Status::Ok, &e.to_string())
            }
        }
    }

    async fn asset(&self, path: &str) -> Response {
        if path.contains("..") || !path.starts_with('/') {
            return Response::not_found();
        }
        let file: String = if path == "/" {
            format!("{}/index.html", WEB_ROOT)
        } else {
            format!("{}{}", WEB_ROOT, path)
        };

        match self.store.fetch_asset(&file).await {
            Ok(bytes) => Response::bytes(content_type_for(&file), bytes),
            Err(StorageError::NotFound) => Response::not_found(),
            Err(e) => {
                error!("Asset {} unavailable: {}", file, e);
                Response::text(Status::Ok, &format!("asset unavailable: {}", e))
            }
        }
    }
}

fn event_json<T: Serialize>(frame: &T) -> Response {
    match serde_json::to_string(frame) {
        Ok(json) => Response::event(&json),
        Err(e) => {
            error!("Telemetry frame encoding failed: {}", e);
            Response::event(SENSOR_PENDING_TEXT)
        }
    }
}
