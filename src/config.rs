use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, Result};

const CLIENT_ID_BASE: &str = "mystrom2mqtt";
const DEFAULT_TOPIC_PREFIX: &str = "github.com/stapelberg/mystrom2mqtt/";

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub http: HttpConfig,
    /// Device name → network address, as loaded from the devices file.
    pub devices: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prepended verbatim to every topic, so it carries its own trailing `/`.
    pub topic_prefix: String,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub poll_interval: Duration,
    pub report_timeout: Duration,
    pub relay_timeout: Duration,
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    lookup(key)
        .ok_or_else(|| BridgeError::Config(format!("{key} environment variable is required")))
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.is_empty())
}

fn or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match optional(lookup, key) {
        Some(v) => v
            .parse()
            .map_err(|_| BridgeError::Config(format!("{key} has an invalid value: {v:?}"))),
        None => Ok(default),
    }
}

/// `mystrom2mqtt@<hostname>`, so co-located instances don't kick each other off the broker.
pub fn default_client_id() -> String {
    let hostname = gethostname::gethostname();
    let hostname = hostname.to_string_lossy();
    if hostname.is_empty() {
        CLIENT_ID_BASE.to_string()
    } else {
        format!("{CLIENT_ID_BASE}@{hostname}")
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source. `from_env` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let devices_file = or_default(&lookup, "DEVICES_FILE", "devices.json".to_string())?;
        let devices = load_devices(&devices_file)?;
        Self::with_devices(&lookup, devices)
    }

    pub(crate) fn with_devices(
        lookup: &impl Fn(&str) -> Option<String>,
        devices: BTreeMap<String, String>,
    ) -> Result<Self> {
        let config = Self {
            mqtt: MqttConfig {
                broker_host: required(lookup, "MQTT_BROKER_HOST")?,
                broker_port: or_default(lookup, "MQTT_BROKER_PORT", 1883)?,
                username: optional(lookup, "MQTT_USERNAME"),
                password: optional(lookup, "MQTT_PASSWORD"),
                topic_prefix: lookup("MQTT_TOPIC_PREFIX")
                    .unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string()),
                client_id: optional(lookup, "MQTT_CLIENT_ID").unwrap_or_else(default_client_id),
            },
            http: HttpConfig {
                poll_interval: Duration::from_secs(or_default(lookup, "POLL_INTERVAL_SECS", 30)?),
                report_timeout: Duration::from_secs(or_default(lookup, "REPORT_TIMEOUT_SECS", 5)?),
                relay_timeout: Duration::from_secs(or_default(lookup, "RELAY_TIMEOUT_SECS", 5)?),
            },
            devices,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.broker_host.is_empty() {
            return Err(BridgeError::Config("MQTT_BROKER_HOST must not be empty".into()));
        }
        if self.devices.is_empty() {
            return Err(BridgeError::Config("No devices found in devices file".into()));
        }
        for (name, address) in &self.devices {
            if name.is_empty() || name.contains(['/', '+', '#']) {
                return Err(BridgeError::Config(format!(
                    "Device name {name:?} is not usable as an MQTT topic segment"
                )));
            }
            if address.trim().is_empty() {
                return Err(BridgeError::Config(format!("Device {name} has no address")));
            }
        }
        if self.http.poll_interval.is_zero() {
            return Err(BridgeError::Config("POLL_INTERVAL_SECS must be > 0".into()));
        }
        if self.http.report_timeout.is_zero() || self.http.relay_timeout.is_zero() {
            return Err(BridgeError::Config("HTTP timeouts must be > 0".into()));
        }
        Ok(())
    }

    pub fn report_topic(&self, device_name: &str) -> String {
        format!("{}report/{}", self.mqtt.topic_prefix, device_name)
    }

    pub fn command_topic_root(&self) -> String {
        format!("{}cmd/relay/", self.mqtt.topic_prefix)
    }

    pub fn command_subscription(&self) -> String {
        format!("{}#", self.command_topic_root())
    }
}

fn load_devices(path: &str) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|source| BridgeError::DevicesFile {
        path: path.to_string(),
        source,
    })?;
    parse_devices(&content).map_err(|source| BridgeError::DevicesParse {
        path: path.to_string(),
        source,
    })
}

// Serde types for the devices file. Each entry is either a bare address or
// an object with an `address` field:
// { "living": "myStrom-Switch-72AB38", "cam": { "address": "10.11.0.109" } }
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDevice {
    Address(String),
    Detailed { address: String },
}

impl RawDevice {
    fn into_address(self) -> String {
        match self {
            Self::Address(address) | Self::Detailed { address } => address,
        }
    }
}

fn parse_devices(content: &str) -> serde_json::Result<BTreeMap<String, String>> {
    let raw: BTreeMap<String, RawDevice> = serde_json::from_str(content)?;
    Ok(raw
        .into_iter()
        .map(|(name, device)| (name, device.into_address()))
        .collect())
}
