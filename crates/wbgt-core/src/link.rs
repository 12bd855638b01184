//! Radio link abstraction for station join and provisioning access point

use alloc::format;
use alloc::string::String;
use core::net::Ipv4Addr;
use thiserror_no_std::Error;

use crate::config::{AccessPointSettings, Secret};
use crate::identity::DeviceIdentity;
use crate::settings::{DeviceSettings, SettingsError, StaticIpv4};

/// Longest SSID 802.11 allows
pub const MAX_SSID_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("network join timed out")]
    JoinTimeout,
    #[error("network configuration invalid: {0}")]
    ConfigInvalid(SettingsError),
    #[error("radio link failure: {0}")]
    LinkFailure(&'static str),
}

/// Provisioning access point parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointConfig {
    pub ssid: String,
    pub passphrase: Secret,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Option<Ipv4Addr>,
}

impl AccessPointConfig {
    pub fn new(settings: &AccessPointSettings, identity: &DeviceIdentity) -> Self {
        let mut ssid = format!("{} {}", settings.ssid_prefix, identity);
        truncate_at_char_boundary(&mut ssid, MAX_SSID_LEN);
        Self {
            ssid,
            passphrase: settings.passphrase.clone(),
            address: settings.address(),
            prefix_len: settings.prefix_len,
            gateway: settings.gateway(),
        }
    }
}

/// Cut `text` to at most `max_len` bytes without splitting a character.
fn truncate_at_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut len = max_len;
    while !text.is_char_boundary(len) {
        len -= 1;
    }
    text.truncate(len);
}

/// Station join parameters taken from the stored settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationConfig {
    pub ssid: String,
    pub password: Secret,
    /// `None` means DHCP
    pub static_ipv4: Option<StaticIpv4>,
}

impl StationConfig {
    pub fn from_settings(settings: &DeviceSettings) -> Result<Self, NetworkError> {
        if settings.wifi_ssid.is_empty() {
            return Err(NetworkError::ConfigInvalid(SettingsError::MissingSsid));
        }
        let static_ipv4 = settings
            .static_ipv4()
            .map_err(NetworkError::ConfigInvalid)?;

        Ok(Self {
            ssid: settings.wifi_ssid.clone(),
            password: Secret::new(&settings.wifi_password),
            static_ipv4,
        })
    }
}

/// The network-join primitive: station and access-point modes.
pub trait NetworkLink {
    /// Bring up the provisioning access point.
    fn start_access_point(
        &mut self,
        config: &AccessPointConfig,
    ) -> impl Future<Output = Result<(), NetworkError>>;

    /// Start one association attempt. Completion is observed through
    /// [`NetworkLink::is_associated`].
    fn begin_join(
        &mut self,
        config: &StationConfig,
    ) -> impl Future<Output = Result<(), NetworkError>>;

    fn is_associated(&mut self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    #[test]
    fn test_access_point_ssid() {
        let identity = DeviceIdentity::from_chip_id(&[0xfa, 0x00, 0x04, 0xa3, 0x0b, 0x00, 0x1c, 0, 0]);
        let ap = AccessPointConfig::new(&DeviceConfig::default().access_point, &identity);

        assert_eq!(ap.ssid, "VF sensors 0004a30b001c");
        assert_eq!(ap.passphrase.expose(), "123456abcdef");
        assert_eq!(ap.address, Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(ap.gateway, None);
    }

    #[test]
    fn test_access_point_ssid_multibyte_prefix() {
        let identity = DeviceIdentity::from_chip_id(&[0xfa, 0x00, 0x04, 0xa3, 0x0b, 0x00, 0x1c, 0, 0]);
        let mut settings = DeviceConfig::default().access_point;
        // 31 ASCII bytes, then a two-byte character straddling the limit
        settings.ssid_prefix = String::from("Estacion de medida del puertos ñ");

        let ap = AccessPointConfig::new(&settings, &identity);
        assert_eq!(ap.ssid, "Estacion de medida del puertos ");
        assert!(ap.ssid.len() <= MAX_SSID_LEN);
    }

    #[test]
    fn test_station_from_settings() {
        let settings = DeviceSettings {
            wifi_enabled: true,
            wifi_ssid: String::from("WLAN_XXX"),
            wifi_password: String::from("123456*"),
            ..DeviceSettings::default()
        };
        let station = StationConfig::from_settings(&settings).unwrap();
        assert_eq!(station.ssid, "WLAN_XXX");
        assert_eq!(station.password.expose(), "123456*");
        assert_eq!(station.static_ipv4, None);

        let no_ssid = DeviceSettings {
            wifi_enabled: true,
            ..DeviceSettings::default()
        };
        assert_eq!(
            StationConfig::from_settings(&no_ssid).unwrap_err(),
            NetworkError::ConfigInvalid(SettingsError::MissingSsid)
        );
    }
}
