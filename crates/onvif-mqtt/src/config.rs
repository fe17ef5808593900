// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Values come from an optional TOML file. Command-line flags and their
//! environment variables (`MQTT_SERVER`, `CAM_DATA_PATH`, ...) override them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default MQTT port when the server URL carries none.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Network interfaces to probe (OS names or IPv4 addresses).
    ///
    /// Empty means every interface with an IPv4 address.
    #[serde(default)]
    pub interfaces: Vec<String>,

    /// MQTT connection settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Path of the persisted device document.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Username used when a command carries none.
    #[serde(default)]
    pub default_user: Option<String>,

    /// Password used when a command carries none.
    #[serde(default)]
    pub default_password: Option<String>,

    /// Discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Motion settings.
    #[serde(default)]
    pub motion: MotionConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./cams.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            mqtt: MqttConfig::default(),
            store_path: default_store_path(),
            default_user: None,
            default_password: None,
            discovery: DiscoveryConfig::default(),
            motion: MotionConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.mqtt.prefix;
        if prefix.is_empty() {
            return Err(ConfigError::Invalid("MQTT prefix is empty".into()));
        }
        if prefix.starts_with('/') || prefix.ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "MQTT prefix '{}' must not start or end with '/'",
                prefix
            )));
        }
        if prefix.contains(['+', '#']) {
            return Err(ConfigError::Invalid(format!(
                "MQTT prefix '{}' must not contain wildcards",
                prefix
            )));
        }

        self.mqtt.broker()?;

        if self.mqtt.client_id.is_empty() {
            return Err(ConfigError::Invalid("MQTT client id is empty".into()));
        }
        if self.discovery.window_ms == 0 {
            return Err(ConfigError::Invalid(
                "discovery.window_ms cannot be 0".into(),
            ));
        }
        if self.motion.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "motion.default_timeout_ms cannot be 0".into(),
            ));
        }
        if self.motion.session_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "motion.session_timeout_secs cannot be 0".into(),
            ));
        }

        Ok(())
    }
}

/// MQTT connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker URL (`tcp://host:port` or `mqtt://host:port`).
    #[serde(default = "default_mqtt_server")]
    pub server: String,

    /// Topic prefix.
    #[serde(default = "default_mqtt_prefix")]
    pub prefix: String,

    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Keep-alive interval (seconds).
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_mqtt_server() -> String {
    "tcp://localhost:1883".to_string()
}

fn default_mqtt_prefix() -> String {
    "onvif".to_string()
}

fn default_client_id() -> String {
    "onvif-mqtt".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            server: default_mqtt_server(),
            prefix: default_mqtt_prefix(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl MqttConfig {
    /// Broker host and port parsed from [`MqttConfig::server`].
    pub fn broker(&self) -> Result<(String, u16), ConfigError> {
        let url = Url::parse(&self.server).map_err(|e| {
            ConfigError::Invalid(format!("MQTT server '{}': {}", self.server, e))
        })?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "MQTT server scheme '{}' not supported (use tcp:// or mqtt://)",
                    other
                )))
            }
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::Invalid(format!("MQTT server '{}' has no host", self.server)))?;

        Ok((host.to_string(), url.port().unwrap_or(DEFAULT_MQTT_PORT)))
    }

    /// Keep-alive as Duration.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// How long each probe collects responses (milliseconds).
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_window_ms() -> u64 {
    3000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
        }
    }
}

impl DiscoveryConfig {
    /// Collection window as Duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Motion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Auto-stop delay when a command carries no timeout (milliseconds).
    #[serde(default = "default_move_timeout")]
    pub default_timeout_ms: u64,

    /// Upper bound for opening a control session (seconds).
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
}

fn default_move_timeout() -> u64 {
    1000
}

fn default_session_timeout() -> u64 {
    10
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_move_timeout(),
            session_timeout_secs: default_session_timeout(),
        }
    }
}

impl MotionConfig {
    /// Default auto-stop delay as Duration.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Session establishment bound as Duration.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}
