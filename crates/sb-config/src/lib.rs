//! Deployment configuration for scriptbus
//!
//! Configuration comes from an optional YAML file with `SCRIPTBUS_*`
//! environment overrides on top, so containerised deployments can run with
//! no file at all. Everything has a sensible default.

use std::path::{Path, PathBuf};

use sb_bus::BrokerConfig;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config file is not valid YAML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// An environment override holds an unusable value.
    #[error("invalid value for {key}: {message}")]
    InvalidOverride { key: String, message: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection settings.
    pub mqtt: BrokerConfig,
    /// Directory holding automation scripts (and its `lib/` subdirectory).
    pub scripts_dir: PathBuf,
    /// Path of the durable state database.
    pub state_path: PathBuf,
    /// HTTP listen address.
    pub http_bind: String,
    /// Log verbosity (an `env_filter` directive, e.g. `info` or `sb_runtime=debug`).
    pub log_level: String,
    /// Capacity of the execution-log ring buffer.
    pub log_capacity: usize,
    /// Capacity of the captured-message ring buffer.
    pub message_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: BrokerConfig::default(),
            scripts_dir: PathBuf::from("scripts"),
            state_path: PathBuf::from("scriptbus.db"),
            http_bind: "0.0.0.0:8321".to_string(),
            log_level: "info".to_string(),
            log_capacity: 500,
            message_capacity: 500,
        }
    }
}

impl Config {
    /// Load configuration from an optional file, then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(std::env::vars())?;
        Ok(config)
    }

    /// Parse a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_yaml::from_str(&text).map_err(|source| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// The library subdirectory inside the scripts directory.
    pub fn library_dir(&self) -> PathBuf {
        self.scripts_dir.join("lib")
    }

    /// Apply `SCRIPTBUS_*` overrides from the given environment.
    fn apply_overrides(
        &mut self,
        vars: impl Iterator<Item = (String, String)>,
    ) -> Result<(), ConfigError> {
        for (key, value) in vars {
            match key.as_str() {
                "SCRIPTBUS_MQTT_HOST" => self.mqtt.host = value,
                "SCRIPTBUS_MQTT_PORT" => {
                    self.mqtt.port =
                        value
                            .parse()
                            .map_err(|_| ConfigError::InvalidOverride {
                                key: "SCRIPTBUS_MQTT_PORT".to_string(),
                                message: format!("{value:?} is not a port number"),
                            })?;
                }
                "SCRIPTBUS_MQTT_CLIENT_ID" => self.mqtt.client_id = value,
                "SCRIPTBUS_MQTT_USERNAME" => self.mqtt.username = Some(value),
                "SCRIPTBUS_MQTT_PASSWORD" => self.mqtt.password = Some(value),
                "SCRIPTBUS_SCRIPTS_DIR" => self.scripts_dir = PathBuf::from(value),
                "SCRIPTBUS_STATE_PATH" => self.state_path = PathBuf::from(value),
                "SCRIPTBUS_HTTP_BIND" => self.http_bind = value,
                "SCRIPTBUS_LOG_LEVEL" => self.log_level = value,
                _ => {}
            }
        }
        Ok(())
    }
}
