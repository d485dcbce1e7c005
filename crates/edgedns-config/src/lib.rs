#![deny(unsafe_code)]

//! Configuration loading and validation for edgedns.
//!
//! Loads TOML configuration files and validates them against expected schemas.
//! Provides the [`AppConfig`] type as the central configuration structure,
//! the [`service`] module for service-level settings, and the [`diff`] module
//! used to decide whether a live reload took effect.

/// Structural comparison of listener and service configuration.
pub mod diff;
/// Service-level settings (`[service]` section).
pub mod service;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use diff::{ConfigChange, ListenerBinding, ListenerBindings};
pub use service::ServiceConfig;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Control socket configuration.
    #[serde(default)]
    pub control: ControlConfig,

    /// DNS listeners, keyed by name (`[listener.0]`, `[listener.lan]`, ...).
    #[serde(default)]
    pub listener: BTreeMap<String, ListenerConfig>,

    /// Service-level settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Remote management authority.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the local control socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Filesystem path of the control socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Minimum number of seconds between two log-shipping attempts.
    #[serde(default = "default_log_ship_interval_secs")]
    pub log_ship_interval_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            log_ship_interval_secs: default_log_ship_interval_secs(),
        }
    }
}

fn default_socket_path() -> String {
    "/var/run/edgedns_control.sock".to_string()
}

fn default_log_ship_interval_secs() -> u64 {
    60
}

/// A single DNS listener.
///
/// Only `ip` and `port` are bound at process start; changing either
/// requires a restart rather than a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Address to bind. `None` lets the daemon pick one.
    #[serde(default)]
    pub ip: Option<IpAddr>,

    /// Port to bind.
    #[serde(default = "default_listener_port")]
    pub port: u16,

    /// Refuse queries from clients outside the local networks.
    #[serde(default)]
    pub restricted: bool,

    /// Accept queries arriving on WAN interfaces.
    #[serde(default)]
    pub allow_wan_clients: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            ip: None,
            port: default_listener_port(),
            restricted: false,
            allow_wan_clients: false,
        }
    }
}

fn default_listener_port() -> u16 {
    53
}

/// Remote management authority configuration.
///
/// ## TOML Example
///
/// ```toml
/// [remote]
/// device_id = "abcd1234"
/// base_url = "https://api.edgedns.net"
/// timeout_secs = 10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Identifier of this device at the remote authority.
    /// Absent or empty means standalone mode.
    #[serde(default)]
    pub device_id: Option<String>,

    /// Base URL of the remote API.
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,

    /// Timeout for a single remote request, in seconds.
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            base_url: default_remote_base_url(),
            timeout_secs: default_remote_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    /// The configured device identifier, treating an empty string as unset.
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref().filter(|id| !id.is_empty())
    }
}

fn default_remote_base_url() -> String {
    "https://api.edgedns.net".to_string()
}

fn default_remote_timeout_secs() -> u64 {
    10
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Number of log lines retained in memory for `logs view` / `logs send`.
    #[serde(default = "default_log_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            buffer_capacity: default_log_buffer_capacity(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_buffer_capacity() -> usize {
    2000
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control.socket_path.is_empty() {
            return Err(ConfigError::Validation(
                "control.socket_path must not be empty".to_string(),
            ));
        }

        for (name, listener) in &self.listener {
            if name.is_empty() {
                return Err(ConfigError::Validation(
                    "listener names must not be empty".to_string(),
                ));
            }
            if listener.port == 0 {
                return Err(ConfigError::Validation(format!(
                    "listener.{name}.port must be non-zero"
                )));
            }
        }

        if !(self.remote.base_url.starts_with("https://")
            || self.remote.base_url.starts_with("http://"))
        {
            return Err(ConfigError::Validation(format!(
                "remote.base_url must be an http(s) URL, got {:?}",
                self.remote.base_url
            )));
        }
        if self.remote.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "remote.timeout_secs must be non-zero".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }
        if self.logging.buffer_capacity == 0 {
            return Err(ConfigError::Validation(
                "logging.buffer_capacity must be at least 1".to_string(),
            ));
        }

        self.service.validate()
    }

    /// Snapshot the `{ip, port}` binding of every configured listener.
    pub fn listener_bindings(&self) -> ListenerBindings {
        self.listener
            .iter()
            .map(|(name, l)| (name.clone(), ListenerBinding::from(l)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.control.socket_path, "/var/run/edgedns_control.sock");
        assert_eq!(config.control.log_ship_interval_secs, 60);
        assert!(config.listener.is_empty());
        assert!(config.remote.device_id().is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.logging.buffer_capacity, 2000);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [control]
            socket_path = "/tmp/edgedns.sock"
            log_ship_interval_secs = 5

            [listener.0]
            ip = "127.0.0.1"
            port = 5354

            [listener.lan]
            ip = "192.168.1.1"
            port = 53
            restricted = true

            [service]
            cache_enable = true
            metrics_query_stats = true
            interface = "br0"

            [remote]
            device_id = "abcd1234"

            [logging]
            level = "debug"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.control.socket_path, "/tmp/edgedns.sock");
        assert_eq!(config.control.log_ship_interval_secs, 5);
        assert_eq!(config.listener.len(), 2);
        assert_eq!(config.listener["0"].port, 5354);
        assert!(config.listener["lan"].restricted);
        assert!(config.service.cache_enable);
        assert!(config.service.metrics_query_stats);
        assert_eq!(config.service.interface.as_deref(), Some("br0"));
        assert_eq!(config.remote.device_id(), Some("abcd1234"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_device_id_is_standalone() {
        let toml = r#"
            [remote]
            device_id = ""
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert!(config.remote.device_id().is_none());
    }

    #[test]
    fn test_validation_rejects_zero_listener_port() {
        let toml = r#"
            [listener.0]
            port = 0
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_empty_socket_path() {
        let toml = r#"
            [control]
            socket_path = ""
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_base_url() {
        let toml = r#"
            [remote]
            base_url = "ftp://example.com"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_log_level() {
        let toml = r#"
            [logging]
            level = "verbose"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_listener_bindings_snapshot() {
        let toml = r#"
            [listener.0]
            ip = "127.0.0.1"
            port = 5354
            restricted = true
        "#;
        let config = AppConfig::parse(toml).unwrap();
        let bindings = config.listener_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(
            bindings["0"],
            ListenerBinding {
                ip: Some("127.0.0.1".parse().unwrap()),
                port: 5354,
            }
        );
    }

    // ── Async file-based loading ──────────────────────────────────────

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("edgedns.toml");
        tokio::fs::write(&path, b"[listener.0]\nip = \"0.0.0.0\"\nport = 5353\n")
            .await
            .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.listener["0"].port, 5353);
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let result = AppConfig::load(Path::new("/nonexistent/file.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn test_load_invalid_toml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        tokio::fs::write(&path, b"not valid toml [[[").await.unwrap();

        let result = AppConfig::load(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    // ── Error display ─────────────────────────────────────────────────

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("bad value".to_string());
        assert_eq!(err.to_string(), "validation error: bad value");
    }
}
