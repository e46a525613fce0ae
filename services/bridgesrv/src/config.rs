//! Configuration
//!
//! Layered with figment, lowest priority first:
//!
//! 1. compiled defaults
//! 2. device identity file (`device_config.json`), placed under `device`
//! 3. YAML service file (`bridgesrv.yaml`)
//! 4. the appliance's flat environment names (`MQTT_BROKER`, `SERIAL_PORT`, ...)
//! 5. `BRIDGESRV_` prefixed environment, `__` separating nested keys
//!
//! String settings from the environment are applied verbatim after the rest,
//! keeping the flat-before-prefixed order.

use figment::providers::{Env, Format, Json, Serialized, Yaml};
use figment::value::{Uncased, UncasedStr};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bus::MqttSettings;
use crate::connection::LinkSettings;
use crate::error::{BridgeError, Result};
use crate::reconnect::ReconnectPolicy;
use crate::topics::{self, TopicSet};
use crate::transport::SerialTransportConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/bridgesrv.yaml";
pub const DEFAULT_DEVICE_CONFIG_PATH: &str = "config/device_config.json";
pub const ENV_PREFIX: &str = "BRIDGESRV_";

/// Flat environment names holding numbers
const LEGACY_ENV: [(&str, &str); 2] = [("MQTT_PORT", "mqtt.port"), ("SERIAL_BAUD", "serial.baud_rate")];

/// Flat environment names holding strings
const LEGACY_STRING_ENV: [(&str, &str); 5] = [
    ("MQTT_BROKER", "mqtt.host"),
    ("MQTT_USER", "mqtt.username"),
    ("MQTT_PASSWORD", "mqtt.password"),
    ("SERIAL_PORT", "serial.port"),
    ("SERIAL_NUMBER", "device.serial_number"),
];

/// String-typed keys. Their environment values are taken verbatim, never
/// parsed, so numeric passwords and serials with leading zeros survive.
const STRING_KEYS: [&str; 13] = [
    "device.serial_number",
    "device.machine_name",
    "device.model",
    "device.firmware_version",
    "serial.port",
    "mqtt.host",
    "mqtt.client_id",
    "mqtt.username",
    "mqtt.password",
    "mqtt.ca_cert_path",
    "topics.namespace",
    "logging.level",
    "logging.dir",
];

/// Device identity
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceConfig {
    pub serial_number: String,
    pub machine_name: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
}

/// Identity file as provisioned on the appliance; absent keys stay unset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct DeviceIdentityFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    machine_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    firmware_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub reconnect_poll_ms: u64,
    pub reconnect_backoff_ms: u64,
    /// Spread reconnect waits by up to 25%
    pub reconnect_jitter: bool,
    /// Attempts per outage before the counter starts over (0 = no limit)
    pub reconnect_max_attempts: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
            settle_delay_ms: 200,
            reconnect_poll_ms: 5000,
            reconnect_backoff_ms: 2000,
            reconnect_jitter: false,
            reconnect_max_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Defaults to `hydrolink-<serial>`
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub ca_cert_path: Option<PathBuf>,
    pub keep_alive_secs: u64,
    pub reconnect_interval_ms: u64,
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            client_id: None,
            username: None,
            password: None,
            tls: true,
            ca_cert_path: None,
            keep_alive_secs: 60,
            reconnect_interval_ms: 5000,
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TopicsConfig {
    pub namespace: String,
    /// Command subscriptions; `{serial}` is replaced by the serial number
    pub command_subscriptions: Vec<String>,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            namespace: "mfc".to_string(),
            command_subscriptions: topics::default_subscription_templates(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
    pub publish_network_name: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 45,
            publish_network_name: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: Option<String>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub device: DeviceConfig,
    pub serial: SerialConfig,
    pub mqtt: MqttConfig,
    pub topics: TopicsConfig,
    pub heartbeat: HeartbeatConfig,
    pub logging: LoggingConfig,
}

/// Files the configuration is read from
#[derive(Debug, Clone)]
pub struct ConfigSources {
    pub config_file: PathBuf,
    pub device_file: PathBuf,
}

impl Default for ConfigSources {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from(DEFAULT_CONFIG_PATH),
            device_file: PathBuf::from(DEFAULT_DEVICE_CONFIG_PATH),
        }
    }
}

fn legacy_env_key(key: &UncasedStr) -> Uncased<'_> {
    LEGACY_ENV
        .iter()
        .find(|(name, _)| key == *name)
        .map(|(_, path)| Uncased::from(*path))
        .unwrap_or_else(|| key.into())
}

/// `mqtt.password` -> `MQTT__PASSWORD`
fn nested_env_name(path: &str) -> String {
    path.replace('.', "__").to_uppercase()
}

fn is_string_key(key: &UncasedStr) -> bool {
    STRING_KEYS
        .iter()
        .any(|path| key.as_str().eq_ignore_ascii_case(&nested_env_name(path)))
}

/// String values set in the environment, lowest priority first
///
/// Empty values count as unset.
fn verbatim_env() -> Vec<(&'static str, String)> {
    let flat = LEGACY_STRING_ENV
        .iter()
        .map(|(name, path)| (*path, (*name).to_string()));
    let prefixed = STRING_KEYS
        .iter()
        .map(|path| (*path, format!("{ENV_PREFIX}{}", nested_env_name(path))));

    flat.chain(prefixed)
        .filter_map(|(path, name)| {
            std::env::var(&name)
                .ok()
                .filter(|value| !value.is_empty())
                .map(|value| (path, value))
        })
        .collect()
}

impl BridgeConfig {
    /// Build the layered figment without extracting it
    pub fn figment(sources: &ConfigSources) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(BridgeConfig::default()));

        if sources.device_file.exists() {
            let identity: DeviceIdentityFile = Figment::from(Json::file(&sources.device_file))
                .extract()
                .map_err(|e| {
                    BridgeError::config(format!(
                        "invalid device identity file {}: {e}",
                        sources.device_file.display()
                    ))
                })?;
            figment = figment.merge(Serialized::default("device", identity));
        }

        let legacy_names: Vec<&str> = LEGACY_ENV.iter().map(|(name, _)| *name).collect();
        figment = figment
            .merge(Yaml::file(&sources.config_file))
            .merge(Env::raw().only(&legacy_names).map(legacy_env_key))
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .filter(|key| !is_string_key(key))
                    .split("__"),
            );

        for (path, value) in verbatim_env() {
            figment = figment.merge(Serialized::default(path, value));
        }
        Ok(figment)
    }

    /// Load and validate
    pub fn load(sources: &ConfigSources) -> Result<Self> {
        let config: BridgeConfig = Self::figment(sources)?.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file only, ignoring the environment
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: BridgeConfig = Figment::from(Serialized::defaults(BridgeConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_topic_level("device.serial_number", &self.device.serial_number)?;
        validate_topic_level("topics.namespace", &self.topics.namespace)?;

        if self.serial.port.is_empty() {
            return Err(BridgeError::config("serial.port cannot be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(BridgeError::config("serial.baud_rate must be greater than zero"));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(BridgeError::config("serial.read_timeout_ms must be greater than zero"));
        }

        if self.mqtt.host.is_empty() {
            return Err(BridgeError::config("mqtt.host cannot be empty"));
        }
        if self.mqtt.port == 0 {
            return Err(BridgeError::config("mqtt.port cannot be 0"));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(BridgeError::config("mqtt.channel_capacity must be greater than zero"));
        }

        if self.heartbeat.interval_secs == 0 {
            return Err(BridgeError::config("heartbeat.interval_secs must be greater than zero"));
        }

        if self.topics.command_subscriptions.is_empty() {
            return Err(BridgeError::config("topics.command_subscriptions cannot be empty"));
        }
        for template in &self.topics.command_subscriptions {
            let rendered = topics::render(template, &self.device.serial_number);
            if rendered.split('/').count() != 4 {
                return Err(BridgeError::config(format!(
                    "subscription '{template}' must have exactly four levels"
                )));
            }
        }

        Ok(())
    }

    pub fn topic_set(&self) -> TopicSet {
        TopicSet::new(
            &self.topics.namespace,
            &self.device.serial_number,
            &self.topics.command_subscriptions,
        )
    }

    pub fn serial_transport(&self) -> SerialTransportConfig {
        SerialTransportConfig {
            port: self.serial.port.clone(),
            baud_rate: self.serial.baud_rate,
            write_timeout: Duration::from_millis(self.serial.write_timeout_ms),
            ..Default::default()
        }
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            read_timeout: Duration::from_millis(self.serial.read_timeout_ms),
            settle_delay: Duration::from_millis(self.serial.settle_delay_ms),
            reconnect: ReconnectPolicy::from_config(
                self.serial.reconnect_poll_ms,
                self.serial.reconnect_backoff_ms,
                self.serial.reconnect_jitter,
                self.serial.reconnect_max_attempts,
            ),
        }
    }

    pub fn client_id(&self) -> String {
        self.mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("hydrolink-{}", self.device.serial_number))
    }

    /// Broker settings; the last will marks the heartbeat offline
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: self.client_id(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            tls: self.mqtt.tls,
            ca_cert_path: self.mqtt.ca_cert_path.clone(),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            reconnect_interval: Duration::from_millis(self.mqtt.reconnect_interval_ms),
            channel_capacity: self.mqtt.channel_capacity,
            last_will: Some((self.topic_set().heartbeat(), b"0".to_vec())),
        }
    }
}

fn validate_topic_level(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(BridgeError::config(format!("{field} cannot be empty")));
    }
    if value
        .chars()
        .any(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace())
    {
        return Err(BridgeError::config(format!(
            "{field} '{value}' must not contain '/', '+', '#' or whitespace"
        )));
    }
    Ok(())
}
