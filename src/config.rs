//! Layered service configuration: YAML file with `PVBRIDGE_*` environment
//! overrides, deserialized into defaulted serde structs and validated.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "/etc/pvbridge.yaml";

const ENV_PREFIX: &str = "PVBRIDGE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub modbus: ModbusConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Register transport endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    pub host: String,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
}

impl ModbusConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| BridgeError::config(format!("invalid modbus host: {e}")))?
            .next()
            .ok_or_else(|| {
                BridgeError::config(format!("modbus host '{}' did not resolve", self.host))
            })
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Random `pvbridge-<n>` id when unset.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_true")]
    pub retain: bool,
}

/// Scheduler cadences, topics and payload shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Per-phase timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: f64,
    #[serde(default = "default_time_quick")]
    pub delivery_time_quick: f64,
    #[serde(default = "default_time_medium")]
    pub delivery_time_medium: f64,
    #[serde(default = "default_time_slow")]
    pub delivery_time_slow: f64,
    #[serde(default)]
    pub topic_quick: Option<String>,
    #[serde(default)]
    pub topic_medium: Option<String>,
    #[serde(default)]
    pub topic_slow: Option<String>,
    /// Registered as the broker last will and republished on shutdown.
    #[serde(default)]
    pub message_last_will: Option<String>,
    /// Item names stripped from outgoing payloads.
    #[serde(default)]
    pub hide_items: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: default_fetch_timeout(),
            delivery_time_quick: default_time_quick(),
            delivery_time_medium: default_time_medium(),
            delivery_time_slow: default_time_slow(),
            topic_quick: None,
            topic_medium: None,
            topic_slow: None,
            message_last_will: None,
            hide_items: Vec::new(),
        }
    }
}

fn default_modbus_port() -> u16 {
    502
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keepalive() -> u64 {
    60
}

fn default_qos() -> u8 {
    2
}

fn default_true() -> bool {
    true
}

fn default_fetch_timeout() -> f64 {
    10.0
}

fn default_time_quick() -> f64 {
    10.0
}

fn default_time_medium() -> f64 {
    60.0
}

fn default_time_slow() -> f64 {
    300.0
}

impl BridgeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: BridgeConfig = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.modbus.host.is_empty() {
            return Err(BridgeError::config("modbus.host must not be empty"));
        }
        if self.mqtt.host.is_empty() {
            return Err(BridgeError::config("mqtt.host must not be empty"));
        }
        if self.mqtt.qos > 2 {
            return Err(BridgeError::config("mqtt.qos must be 0, 1 or 2"));
        }

        let runner = &self.runner;
        if runner.fetch_timeout < 2.0 {
            return Err(BridgeError::config("runner.fetch_timeout must be >= 2 seconds"));
        }
        if runner.delivery_time_quick < 6.0 {
            return Err(BridgeError::config("runner.delivery_time_quick must be >= 6 seconds"));
        }
        if runner.delivery_time_medium < 30.0 {
            return Err(BridgeError::config(
                "runner.delivery_time_medium must be >= 30 seconds",
            ));
        }
        if runner.delivery_time_slow < 60.0 {
            return Err(BridgeError::config("runner.delivery_time_slow must be >= 60 seconds"));
        }
        Ok(())
    }
}
