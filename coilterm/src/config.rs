//! Configuration for the coil console.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use coilterm_common::LoggingConfig;

use crate::session::SessionOptions;
use crate::transport::TcpSettings;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] coilterm_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete tool configuration. Every field has a default, so an empty
/// file (or no file at all) is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoilTermConfig {
    /// Modbus unit connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Session timing
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Log every Modbus request and response
    #[serde(default)]
    pub verbose: bool,
}

/// Modbus TCP connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Host address (IP or hostname); prompted for when absent
    #[serde(default)]
    pub host: Option<String>,

    /// TCP port; prompted for when absent
    #[serde(default)]
    pub port: Option<u16>,

    /// Modbus unit identifier
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect and response timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_unit_id() -> u8 {
    255
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Session timing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Pause between a coil write and its confirmation read
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Pause after leaving the write loop before the menu returns
    #[serde(default = "default_menu_pause_ms")]
    pub menu_pause_ms: u64,
}

fn default_settle_delay_ms() -> u64 {
    100
}

fn default_menu_pause_ms() -> u64 {
    200
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            menu_pause_ms: default_menu_pause_ms(),
        }
    }
}

impl SessionConfig {
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }

    pub fn menu_pause(&self) -> Duration {
        Duration::from_millis(self.menu_pause_ms)
    }
}

impl ConnectionConfig {
    /// Build transport settings once host and port are known.
    pub fn tcp_settings(&self, host: impl Into<String>, port: u16) -> TcpSettings {
        TcpSettings::new(host, port)
            .with_unit_id(self.unit_id)
            .with_timeout(Duration::from_millis(self.timeout_ms))
    }
}

impl CoilTermConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: CoilTermConfig = coilterm_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(host) = &self.connection.host {
            if host.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "connection.host cannot be empty".to_string(),
                ));
            }
        }

        if self.connection.port == Some(0) {
            return Err(ConfigError::Validation(
                "connection.port must be 1-65535".to_string(),
            ));
        }

        if self.connection.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "connection.timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
