//! Persisted device settings record
//!
//! The wire representation is a flat JSON object whose values are all
//! strings; boolean flags are `"0"`/`"1"` and integers are decimal text.
//! Existing stored files depend on this exact shape, including key order,
//! so encoding goes through [`SettingsRecord`] rather than the typed struct.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use core::net::Ipv4Addr;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Default LoRa uplink frequency (EU868 channel 0)
pub const DEFAULT_LORA_FREQUENCY_HZ: u32 = 868_100_000;
/// Default LoRa gateway data rate
pub const DEFAULT_LORA_GATEWAY_DATA_RATE: &str = "SF7BW125";
/// Default LoRa node data rate index
pub const DEFAULT_LORA_NODE_DATA_RATE: u8 = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("settings payload does not match the settings schema")]
    Malformed,
    #[error("field `{0}` must be \"0\" or \"1\"")]
    InvalidFlag(&'static str),
    #[error("field `{0}` must be a decimal integer")]
    InvalidInteger(&'static str),
    #[error("field `{0}` must be a dotted IPv4 address")]
    InvalidAddress(&'static str),
    #[error("wifi_mask is not a contiguous netmask")]
    InvalidNetmask,
    #[error("Wi-Fi is enabled but wifi_ssid is empty")]
    MissingSsid,
    #[error("Wi-Fi and LoRa cannot both be enabled")]
    ConflictingTransports,
}

/// Raw wire shape of the settings document.
///
/// Field order is the serialization order and must not change.
#[derive(Serialize, Deserialize, Debug, Default)]
struct SettingsRecord {
    #[serde(default)]
    gbl_user_code: String,
    wifi_enabled: String,
    lora_enabled: String,
    #[serde(default)]
    wifi_ssid: String,
    #[serde(default)]
    wifi_password: String,
    #[serde(default)]
    wifi_ip: String,
    #[serde(default)]
    wifi_mask: String,
    #[serde(default)]
    wifi_gateway: String,
    #[serde(default)]
    wifi_dns: String,
    #[serde(default)]
    lorafreq: String,
    #[serde(default)]
    loragwdr: String,
    #[serde(default)]
    loranodedr: String,
    #[serde(default)]
    mqtt_uri: String,
    #[serde(default)]
    mqtt_user: String,
    #[serde(default)]
    mqtt_password: String,
    #[serde(default)]
    mqtt_topic: String,
}

/// Static IPv4 override for station mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticIpv4 {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Ipv4Addr,
    pub dns: Option<Ipv4Addr>,
}

/// Validated device configuration.
///
/// Exactly one of `wifi_enabled`/`lora_enabled` may be set. Only the Wi-Fi
/// transport is driven by the firmware; the LoRa and MQTT fields are carried
/// so that a save never drops them.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    pub user_code: String,
    pub wifi_enabled: bool,
    pub lora_enabled: bool,
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub wifi_ip: Option<String>,
    pub wifi_mask: Option<String>,
    pub wifi_gateway: Option<String>,
    pub wifi_dns: Option<String>,
    pub lora_frequency_hz: u32,
    pub lora_gateway_data_rate: String,
    pub lora_node_data_rate: u8,
    pub mqtt_uri: String,
    pub mqtt_user: String,
    pub mqtt_password: String,
    pub mqtt_topic: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            user_code: String::new(),
            wifi_enabled: false,
            lora_enabled: false,
            wifi_ssid: String::new(),
            wifi_password: String::new(),
            wifi_ip: None,
            wifi_mask: None,
            wifi_gateway: None,
            wifi_dns: None,
            lora_frequency_hz: DEFAULT_LORA_FREQUENCY_HZ,
            lora_gateway_data_rate: String::from(DEFAULT_LORA_GATEWAY_DATA_RATE),
            lora_node_data_rate: DEFAULT_LORA_NODE_DATA_RATE,
            mqtt_uri: String::new(),
            mqtt_user: String::new(),
            mqtt_password: String::new(),
            mqtt_topic: String::new(),
        }
    }
}

impl DeviceSettings {
    /// Parse and validate a JSON settings document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SettingsError> {
        let record: SettingsRecord =
            serde_json::from_slice(bytes).map_err(|_| SettingsError::Malformed)?;
        Self::try_from(record)
    }

    /// Canonical JSON encoding (compact, fixed key order).
    pub fn to_json(&self) -> Result<Vec<u8>, SettingsError> {
        serde_json::to_vec(&SettingsRecord::from(self)).map_err(|_| SettingsError::Malformed)
    }

    /// Static IPv4 override, if one is configured.
    ///
    /// Applies only when `wifi_ip`, `wifi_mask` and `wifi_gateway` are all
    /// non-empty; any other combination means DHCP.
    pub fn static_ipv4(&self) -> Result<Option<StaticIpv4>, SettingsError> {
        let (Some(ip), Some(mask), Some(gateway)) = (
            filled(&self.wifi_ip),
            filled(&self.wifi_mask),
            filled(&self.wifi_gateway),
        ) else {
            return Ok(None);
        };
        let address = parse_ipv4(ip, "wifi_ip")?;
        let mask = parse_ipv4(mask, "wifi_mask")?;
        let gateway = parse_ipv4(gateway, "wifi_gateway")?;
        let prefix_len = netmask_to_prefix(mask).ok_or(SettingsError::InvalidNetmask)?;
        let dns = self
            .wifi_dns
            .as_deref()
            .map(|dns| parse_ipv4(dns, "wifi_dns"))
            .transpose()?;

        Ok(Some(StaticIpv4 {
            address,
            prefix_len,
            gateway,
            dns,
        }))
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.wifi_enabled && self.lora_enabled {
            return Err(SettingsError::ConflictingTransports);
        }
        if self.wifi_enabled && self.wifi_ssid.is_empty() {
            return Err(SettingsError::MissingSsid);
        }
        self.static_ipv4()?;
        Ok(())
    }
}

fn filled(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|value| !value.is_empty())
}

impl TryFrom<SettingsRecord> for DeviceSettings {
    type Error = SettingsError;

    fn try_from(record: SettingsRecord) -> Result<Self, Self::Error> {
        let settings = Self {
            user_code: record.gbl_user_code,
            wifi_enabled: parse_flag(&record.wifi_enabled, "wifi_enabled")?,
            lora_enabled: parse_flag(&record.lora_enabled, "lora_enabled")?,
            wifi_ssid: record.wifi_ssid,
            wifi_password: record.wifi_password,
            wifi_ip: non_empty(record.wifi_ip),
            wifi_mask: non_empty(record.wifi_mask),
            wifi_gateway: non_empty(record.wifi_gateway),
            wifi_dns: non_empty(record.wifi_dns),
            lora_frequency_hz: parse_int(&record.lorafreq, "lorafreq", DEFAULT_LORA_FREQUENCY_HZ)?,
            lora_gateway_data_rate: non_empty(record.loragwdr)
                .unwrap_or_else(|| String::from(DEFAULT_LORA_GATEWAY_DATA_RATE)),
            lora_node_data_rate: parse_int(
                &record.loranodedr,
                "loranodedr",
                DEFAULT_LORA_NODE_DATA_RATE,
            )?,
            mqtt_uri: record.mqtt_uri,
            mqtt_user: record.mqtt_user,
            mqtt_password: record.mqtt_password,
            mqtt_topic: record.mqtt_topic,
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl From<&DeviceSettings> for SettingsRecord {
    fn from(settings: &DeviceSettings) -> Self {
        Self {
            gbl_user_code: settings.user_code.clone(),
            wifi_enabled: flag_text(settings.wifi_enabled),
            lora_enabled: flag_text(settings.lora_enabled),
            wifi_ssid: settings.wifi_ssid.clone(),
            wifi_password: settings.wifi_password.clone(),
            wifi_ip: settings.wifi_ip.clone().unwrap_or_default(),
            wifi_mask: settings.wifi_mask.clone().unwrap_or_default(),
            wifi_gateway: settings.wifi_gateway.clone().unwrap_or_default(),
            wifi_dns: settings.wifi_dns.clone().unwrap_or_default(),
            lorafreq: settings.lora_frequency_hz.to_string(),
            loragwdr: settings.lora_gateway_data_rate.clone(),
            loranodedr: settings.lora_node_data_rate.to_string(),
            mqtt_uri: settings.mqtt_uri.clone(),
            mqtt_user: settings.mqtt_user.clone(),
            mqtt_password: settings.mqtt_password.clone(),
            mqtt_topic: settings.mqtt_topic.clone(),
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for DeviceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSettings")
            .field("user_code", &self.user_code)
            .field("wifi_enabled", &self.wifi_enabled)
            .field("lora_enabled", &self.lora_enabled)
            .field("wifi_ssid", &self.wifi_ssid)
            .field("wifi_ip", &self.wifi_ip)
            .field("lora_frequency_hz", &self.lora_frequency_hz)
            .field("mqtt_uri", &self.mqtt_uri)
            .field("mqtt_topic", &self.mqtt_topic)
            .finish_non_exhaustive()
    }
}

fn parse_flag(value: &str, field: &'static str) -> Result<bool, SettingsError> {
    match value.trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(SettingsError::InvalidFlag(field)),
    }
}

fn flag_text(value: bool) -> String {
    String::from(if value { "1" } else { "0" })
}

fn parse_int<T: FromStr>(value: &str, field: &'static str, default: T) -> Result<T, SettingsError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(default);
    }
    value
        .parse()
        .map_err(|_| SettingsError::InvalidInteger(field))
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_ipv4(value: &str, field: &'static str) -> Result<Ipv4Addr, SettingsError> {
    Ipv4Addr::from_str(value.trim()).map_err(|_| SettingsError::InvalidAddress(field))
}

/// Convert a dotted netmask to a prefix length, rejecting non-contiguous masks.
pub fn netmask_to_prefix(mask: Ipv4Addr) -> Option<u8> {
    let value = u32::from_be_bytes(mask.octets());
    let prefix = value.leading_ones();
    let reconstructed = if prefix == 0 {
        0
    } else {
        u32::MAX.checked_shl(32 - prefix).unwrap_or(0)
    };
    (reconstructed == value).then_some(prefix as u8)
}
