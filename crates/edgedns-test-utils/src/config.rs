//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::net::IpAddr;

use edgedns_config::{AppConfig, ListenerConfig};

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .listener("lan", "192.168.1.1", 53)
///     .device_id("abc123")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    /// Add a listener bound to `ip:port`.
    ///
    /// # Panics
    ///
    /// Panics if `ip` is not an IP address.
    pub fn listener(mut self, name: &str, ip: &str, port: u16) -> Self {
        let ip: IpAddr = ip.parse().expect("invalid listener ip");
        self.config.listener.insert(
            name.to_string(),
            ListenerConfig {
                ip: Some(ip),
                port,
                ..ListenerConfig::default()
            },
        );
        self
    }

    pub fn device_id(mut self, id: &str) -> Self {
        self.config.remote.device_id = Some(id.to_string());
        self
    }

    pub fn interface(mut self, interface: &str) -> Self {
        self.config.service.interface = Some(interface.to_string());
        self
    }

    pub fn query_stats(mut self, enabled: bool) -> Self {
        self.config.service.metrics_query_stats = enabled;
        self
    }

    pub fn log_path(mut self, path: &str) -> Self {
        self.config.service.log_path = Some(path.to_string());
        self
    }

    pub fn log_ship_interval_secs(mut self, secs: u64) -> Self {
        self.config.control.log_ship_interval_secs = secs;
        self
    }

    pub fn socket_path(mut self, path: &str) -> Self {
        self.config.control.socket_path = path.to_string();
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
