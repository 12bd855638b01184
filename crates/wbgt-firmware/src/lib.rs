//! ESP32-S3 firmware-specific modules for the wbgt-node sensor
//!
//! Everything here touches ESP32 peripherals directly: bus bring-up, the
//! radio link, the SD card medium and the hardware entropy source. The
//! device logic itself lives in `wbgt-core`.

#![no_std]

extern crate alloc;

pub mod climate;
pub mod config;
pub mod entropy;
pub mod hardware;
pub mod net;
pub mod sd_medium;

use wbgt_core::sensors::SensorAggregator;
use wbgt_core::storage::SettingsStore;

/// Sensor set shared by every HTTP worker
pub type Sensors = SensorAggregator<hardware::ClimateSensor, hardware::GlobeProbe>;

/// Encrypted settings on the SD card
pub type Store = SettingsStore<hardware::SdStorage, entropy::HardwareRng>;
