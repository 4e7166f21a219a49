//! # Configuration
//!
//! Loads the data manager's settings from a single TOML file. The file is read once
//! at startup; every topic string the process uses is derived from it up front and
//! handed around as a [`Topics`] value, so nothing re-reads the file while running.
//!
//! ## Location
//! `DATAMANAGER_CONFIG` wins if set. Otherwise the file lives at
//! `<config dir>/datamanager/config.toml` and is created with defaults on first start.

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_ENV: &str = "DATAMANAGER_CONFIG";
const CONFIG_DIR: &str = "datamanager";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttServer,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Broker endpoint and credentials.
///
/// Password is never shown by the `Display` impl, which is what ends up in logs.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MqttServer {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: bool,
    /// Prepended to every client id this process registers with the broker
    pub client_prefix: String,
    pub keep_alive_secs: u64,
    /// Capacity of the inbound message channel between the receive pump and the manager
    pub channel_capacity: usize,
}

impl Default for MqttServer {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            username: String::new(),
            password: String::new(),
            tls: true,
            client_prefix: "iot-".to_string(),
            keep_alive_secs: 5,
            channel_capacity: 100,
        }
    }
}

impl std::fmt::Display for MqttServer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TopicConfig {
    pub base_topic: String,
    pub sensor_ids: Vec<String>,
    pub button_ids: Vec<String>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            base_topic: "home".to_string(),
            sensor_ids: vec!["dht1".to_string()],
            button_ids: vec!["button1".to_string()],
        }
    }
}

/// Relay identity and the two hysteresis thresholds in °C.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub relay_id: String,
    pub temp_on: f64,
    pub temp_off: f64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay_id: "relay1".to_string(),
            temp_on: 30.0,
            temp_off: 29.0,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    /// Upper bound for any single store write or publish
    pub io_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://smart_home.db".to_string(),
            io_timeout_ms: 2000,
        }
    }
}

impl StorageConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl Config {
    /// Resolves the config path, writing a default file if none exists yet, and loads it.
    pub async fn load_or_init() -> Result<(Self, PathBuf)> {
        let path = Self::config_path()?;
        Self::ensure_default_config(&path).await?;
        let config = Self::load(&path).await?;
        Ok((config, path))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml(&content)
            .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let relay = &self.relay;
        if !relay.temp_on.is_finite() || !relay.temp_off.is_finite() {
            return Err(eyre!("Relay thresholds must be finite numbers"));
        }
        if relay.temp_off >= relay.temp_on {
            return Err(eyre!(
                "temp_off ({}) must be lower than temp_on ({})",
                relay.temp_off,
                relay.temp_on
            ));
        }
        if relay.relay_id.trim().is_empty() {
            return Err(eyre!("relay_id must not be empty"));
        }
        if self.topics.base_topic.trim().is_empty() {
            return Err(eyre!("base_topic must not be empty"));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(eyre!("channel_capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.topics, &self.relay.relay_id)
    }

    fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or_else(|| eyre!("No config directory available"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    async fn ensure_default_config(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            debug!("Config file present at {}", path.display());
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write default config file: {}", e))?;

        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }
}

/// Every topic string the data manager reads or writes, built once from the base namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    pub base: String,
    pub sensors_root: String,
    pub controls_root: String,
    pub sensors: Vec<String>,
    pub controls: Vec<String>,
    pub relay_state: String,
    pub relay_set: String,
    pub alerts: String,
}

impl Topics {
    pub fn new(cfg: &TopicConfig, relay_id: &str) -> Self {
        let base = cfg.base_topic.trim_end_matches('/').to_string();
        let join = |parts: &[&str]| {
            let mut path = base.clone();
            for part in parts {
                path.push('/');
                path.push_str(part);
            }
            path
        };

        Self {
            sensors_root: join(&["sensors"]),
            controls_root: join(&["controls"]),
            sensors: cfg.sensor_ids.iter().map(|id| join(&["sensors", id.as_str()])).collect(),
            controls: cfg.button_ids.iter().map(|id| join(&["controls", id.as_str()])).collect(),
            relay_state: join(&["actuators", relay_id, "state"]),
            relay_set: join(&["actuators", relay_id, "set"]),
            alerts: join(&["alerts"]),
            base,
        }
    }

    /// Topics the data manager subscribes to. Alerts are published, not consumed.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics = Vec::with_capacity(self.sensors.len() + self.controls.len() + 1);
        topics.extend(self.sensors.iter().cloned());
        topics.extend(self.controls.iter().cloned());
        topics.push(self.relay_state.clone());
        topics
    }
}
