//! # Configuration Management
//!
//! Centralized configuration for the session layer.
//!
//! This module provides structured configuration for connections, including
//! MTU, keep-alive cadence, buffer pooling, and logging options.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()`
//!
//! ## Defaults
//! - MTU 1400 (MSS 1392 after the 8-byte header)
//! - 2-second cap on the close-time reset farewell
//! - keep-alive every 2 seconds, expiry after 10 silent seconds

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default maximum datagram size.
pub const DEFAULT_MTU: u16 = 1400;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SessionConfig {
    /// Connection-level configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Keep-alive configuration
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,

    /// Buffer pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| SessionError::Config(format!("failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| SessionError::Config(format!("failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| SessionError::Config(format!("failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Start with defaults
        let mut config = Self::default();

        // Override with environment variables
        if let Ok(mtu) = std::env::var("DATAGRAM_SESSION_MTU") {
            if let Ok(val) = mtu.parse::<u16>() {
                config.connection.mtu = val;
            }
        }

        if let Ok(timeout) = std::env::var("DATAGRAM_SESSION_RESET_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.connection.reset_send_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(interval) = std::env::var("DATAGRAM_SESSION_KEEP_ALIVE_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.keep_alive.interval = Duration::from_millis(val);
            }
        }

        if let Ok(expire) = std::env::var("DATAGRAM_SESSION_EXPIRE_TIMEOUT_MS") {
            if let Ok(val) = expire.parse::<u64>() {
                config.keep_alive.expire_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(level) = std::env::var("DATAGRAM_SESSION_LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SessionError::Config(format!("failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| SessionError::Config(format!("failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.connection.validate());
        errors.extend(self.keep_alive.validate());
        errors.extend(self.pool.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Config(format!(
                "configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Connection-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum datagram size the transport accepts
    pub mtu: u16,

    /// Cap on the close-time reset farewell send
    #[serde(with = "duration_serde")]
    pub reset_send_timeout: Duration,

    /// Size of the inbound receive buffer
    pub recv_buffer_len: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            reset_send_timeout: Duration::from_secs(2),
            recv_buffer_len: 64 * 1024,
        }
    }
}

impl ConnectionConfig {
    /// Validate connection configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // The 8-byte header must leave room for payload
        if self.mtu <= 8 {
            errors.push(format!("MTU too small: {} (minimum: 9)", self.mtu));
        } else if self.mtu as usize > 65507 {
            errors.push(format!(
                "MTU exceeds the UDP datagram limit: {} (maximum: 65507)",
                self.mtu
            ));
        }

        if self.reset_send_timeout.as_millis() < 100 {
            errors.push("Reset send timeout too short (minimum: 100ms)".to_string());
        } else if self.reset_send_timeout.as_secs() > 30 {
            errors.push("Reset send timeout too long (maximum: 30s)".to_string());
        }

        if self.recv_buffer_len < self.mtu as usize {
            errors.push(format!(
                "Receive buffer smaller than MTU: {} < {}",
                self.recv_buffer_len, self.mtu
            ));
        }

        errors
    }
}

/// Keep-alive configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Interval between outbound keep-alive pings
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Remote silence after which the connection is declared dead
    #[serde(with = "duration_serde")]
    pub expire_timeout: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            expire_timeout: Duration::from_secs(10),
        }
    }
}

impl KeepAliveConfig {
    /// Validate keep-alive configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.interval.as_millis() < 100 {
            errors.push("Keep-alive interval too short (minimum: 100ms)".to_string());
        } else if self.interval.as_secs() > 3600 {
            errors.push("Keep-alive interval too long (maximum: 1 hour)".to_string());
        }

        if self.expire_timeout <= self.interval {
            errors.push(format!(
                "Expire timeout must exceed the keep-alive interval: {:?} <= {:?}",
                self.expire_timeout, self.interval
            ));
        }

        errors
    }
}

/// Buffer pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of pre-allocated buffers
    pub pool_size: usize,

    /// Whether the pool allocates fresh buffers when empty
    pub grow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 50,
            grow: true,
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.pool_size == 0 && !self.grow {
            errors.push("A non-growing pool needs at least one buffer".to_string());
        }
        if self.pool_size > 1_000_000 {
            errors.push(format!(
                "Pool size very high: {} (ensure memory can support this)",
                self.pool_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Whether to include the emitting module target in log lines
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.level.parse::<Level>().is_err() {
            errors.push(format!(
                "Invalid log level: '{}' (expected trace/debug/info/warn/error)",
                self.level
            ));
        }

        errors
    }
}

/// Serialize/deserialize `Duration` as integer milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
