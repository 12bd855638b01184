//! Device configuration
//!
//! Factory parameters that are fixed per build rather than per user: the
//! settings cipher key, the provisioning access point and the station join
//! policy. Defaults are the deployed factory values; firmware overrides them
//! at build time and the simulator from a JSON file.

use alloc::string::String;
use core::fmt;
use core::net::Ipv4Addr;
use serde::{Deserialize, Serialize};

use crate::storage::StorageFiles;

pub const DEFAULT_CIPHER_KEY: &str = "ujso3kgnxtuth2bs";
pub const DEFAULT_AP_SSID_PREFIX: &str = "VF sensors";
pub const DEFAULT_AP_PASSPHRASE: &str = "123456abcdef";

/// A string that never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: &str) -> Self {
        Self(String::from(value))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPointSettings {
    /// SSID is `"<prefix> <identity>"`
    pub ssid_prefix: String,
    pub passphrase: Secret,
    pub address: [u8; 4],
    pub prefix_len: u8,
    /// Advertised gateway; `None` leaves clients without a default route.
    pub gateway: Option<[u8; 4]>,
}

impl AccessPointSettings {
    pub fn address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.address)
    }

    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway.map(Ipv4Addr::from)
    }
}

impl Default for AccessPointSettings {
    fn default() -> Self {
        Self {
            ssid_prefix: String::from(DEFAULT_AP_SSID_PREFIX),
            passphrase: Secret::new(DEFAULT_AP_PASSPHRASE),
            address: [10, 0, 0, 10],
            prefix_len: 24,
            gateway: None,
        }
    }
}

/// How long boot waits for station association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinPolicy {
    /// Window per join attempt
    pub attempt_timeout_ms: u32,
    /// Idle time between association polls
    pub poll_interval_ms: u32,
    /// `None` keeps retrying until reset
    pub max_attempts: Option<u32>,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 5_000,
            poll_interval_ms: 100,
            max_attempts: Some(12),
        }
    }
}

impl JoinPolicy {
    /// Association polls that fit in one attempt window.
    pub fn polls_per_attempt(&self) -> u32 {
        (self.attempt_timeout_ms / self.poll_interval_ms.max(1)).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub cipher_key: Secret,
    pub access_point: AccessPointSettings,
    pub join: JoinPolicy,
    pub files: StorageFiles,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            cipher_key: Secret::new(DEFAULT_CIPHER_KEY),
            access_point: AccessPointSettings::default(),
            join: JoinPolicy::default(),
            files: StorageFiles::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.cipher_key.expose(), "ujso3kgnxtuth2bs");
        assert_eq!(config.access_point.ssid_prefix, "VF sensors");
        assert_eq!(config.access_point.passphrase.expose(), "123456abcdef");
        assert_eq!(config.access_point.address(), Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(config.access_point.prefix_len, 24);
        assert_eq!(config.join.attempt_timeout_ms, 5_000);
        assert_eq!(config.files.settings, "globalsettings");
    }

    #[test]
    fn test_partial_json_overrides() {
        let config: DeviceConfig = serde_json::from_str(
            r#"{"access_point":{"ssid_prefix":"Lab"},"join":{"max_attempts":null}}"#,
        )
        .unwrap();

        assert_eq!(config.access_point.ssid_prefix, "Lab");
        assert_eq!(config.access_point.passphrase.expose(), "123456abcdef");
        assert_eq!(config.join.max_attempts, None);
        assert_eq!(config.join.attempt_timeout_ms, 5_000);
        assert_eq!(config.cipher_key.expose(), "ujso3kgnxtuth2bs");
    }

    #[test]
    fn test_polls_per_attempt() {
        assert_eq!(JoinPolicy::default().polls_per_attempt(), 50);
        let odd = JoinPolicy {
            attempt_timeout_ms: 10,
            poll_interval_ms: 0,
            max_attempts: None,
        };
        assert_eq!(odd.polls_per_attempt(), 10);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let rendered = format!("{:?}", DeviceConfig::default());
        assert!(!rendered.contains("ujso3kgnxtuth2bs"));
        assert!(!rendered.contains("123456abcdef"));
    }
}
