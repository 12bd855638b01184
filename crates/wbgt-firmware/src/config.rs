//! Factory configuration baked in at build time
//!
//! `build.rs` exports the values from the environment (or `.env`), falling
//! back to the deployed defaults.

use alloc::string::String;
use wbgt_core::config::{AccessPointSettings, DeviceConfig, JoinPolicy, Secret};
use wbgt_core::storage::StorageFiles;

const CIPHER_KEY: &str = env!("WBGT_CIPHER_KEY");
const AP_SSID_PREFIX: &str = env!("WBGT_AP_SSID_PREFIX");
const AP_PASSPHRASE: &str = env!("WBGT_AP_PASSPHRASE");

// embedded-sdmmc only opens FAT 8.3 short names.
pub const SETTINGS_FILE: &str = "GLOBSET.BIN";
pub const SHADOW_FILE: &str = "GLOBSET.NEW";

pub fn device_config() -> DeviceConfig {
    DeviceConfig {
        cipher_key: Secret::new(CIPHER_KEY),
        access_point: AccessPointSettings {
            ssid_prefix: String::from(AP_SSID_PREFIX),
            passphrase: Secret::new(AP_PASSPHRASE),
            ..AccessPointSettings::default()
        },
        join: JoinPolicy::default(),
        files: StorageFiles {
            settings: String::from(SETTINGS_FILE),
            shadow: String::from(SHADOW_FILE),
        },
    }
}
