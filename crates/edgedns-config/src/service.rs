//! Service-level settings.
//!
//! Most of these are read once at process start (cache sizing, discovery
//! sources, the metrics listener), so a reload that changes any of them
//! cannot take full effect without a restart. [`ServiceConfig::changed_fields`]
//! reports exactly which ones moved.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// The `[service]` section.
///
/// Keys this version does not know about are kept verbatim in `extra` so
/// they still participate in change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Log level override for the DNS engine.
    #[serde(default)]
    pub log_level: Option<String>,

    /// Log file path. When set, `logs view` and `logs send` read this file
    /// instead of the in-memory buffer.
    #[serde(default)]
    pub log_path: Option<String>,

    /// Enable the answer cache.
    #[serde(default)]
    pub cache_enable: bool,

    /// Number of cached answers.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Override answer TTLs (seconds, 0 = keep upstream TTL).
    #[serde(default)]
    pub cache_ttl_override: u32,

    /// Serve stale answers while refreshing.
    #[serde(default)]
    pub cache_serve_stale: bool,

    /// Upper bound on in-flight upstream requests.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Client discovery via mDNS.
    #[serde(default = "default_true")]
    pub discover_mdns: bool,

    /// Client discovery via the ARP table.
    #[serde(default = "default_true")]
    pub discover_arp: bool,

    /// Client discovery via DHCP leases.
    #[serde(default = "default_true")]
    pub discover_dhcp: bool,

    /// Client discovery via reverse lookups.
    #[serde(default = "default_true")]
    pub discover_ptr: bool,

    /// Client discovery via the hosts file.
    #[serde(default = "default_true")]
    pub discover_hosts: bool,

    /// Count queries per client and report them in `clients list`.
    #[serde(default)]
    pub metrics_query_stats: bool,

    /// Address of the Prometheus listener, if any.
    #[serde(default)]
    pub metrics_listener: Option<String>,

    /// Network interface the daemon points the system resolver at.
    #[serde(default)]
    pub interface: Option<String>,

    /// Unrecognised keys.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            log_path: None,
            cache_enable: false,
            cache_size: default_cache_size(),
            cache_ttl_override: 0,
            cache_serve_stale: false,
            max_concurrent_requests: default_max_concurrent_requests(),
            discover_mdns: true,
            discover_arp: true,
            discover_dhcp: true,
            discover_ptr: true,
            discover_hosts: true,
            metrics_query_stats: false,
            metrics_listener: None,
            interface: None,
            extra: BTreeMap::new(),
        }
    }
}

fn default_cache_size() -> usize {
    4096
}

fn default_max_concurrent_requests() -> usize {
    256
}

fn default_true() -> bool {
    true
}

/// Push the name of every listed field whose value differs.
macro_rules! changed {
    ($old:expr, $new:expr, $out:expr; $($field:ident),+ $(,)?) => {
        $(
            if $old.$field != $new.$field {
                $out.push(stringify!($field).to_string());
            }
        )+
    };
}

impl ServiceConfig {
    /// Names of the fields that differ between `self` and `other`.
    ///
    /// Unknown keys are reported as `extra.<key>`. An empty result means the
    /// two configurations are structurally equal.
    pub fn changed_fields(&self, other: &ServiceConfig) -> Vec<String> {
        let mut out = Vec::new();
        changed!(self, other, out;
            log_level,
            log_path,
            cache_enable,
            cache_size,
            cache_ttl_override,
            cache_serve_stale,
            max_concurrent_requests,
            discover_mdns,
            discover_arp,
            discover_dhcp,
            discover_ptr,
            discover_hosts,
            metrics_query_stats,
            metrics_listener,
            interface,
        );

        let keys = self.extra.keys().chain(other.extra.keys());
        let mut seen = std::collections::BTreeSet::new();
        for key in keys {
            let same = match (self.extra.get(key), other.extra.get(key)) {
                (Some(a), Some(b)) => same_value(a, b),
                (None, None) => true,
                _ => false,
            };
            if seen.insert(key) && !same {
                out.push(format!("extra.{key}"));
            }
        }
        out
    }

    /// Validate service settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_enable && self.cache_size == 0 {
            return Err(ConfigError::Validation(
                "service.cache_size must be non-zero when the cache is enabled".to_string(),
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::Validation(
                "service.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.interface.as_deref() == Some("") {
            return Err(ConfigError::Validation(
                "service.interface must not be empty when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Structural equality for opaque values. NaN equals NaN, so an untouched
/// `nan` key never reads as changed.
fn same_value(a: &toml::Value, b: &toml::Value) -> bool {
    use toml::Value;
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| same_value(a, b))
        }
        (Value::Table(x), Value::Table(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| same_value(v, w)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(s: &str) -> ServiceConfig {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn test_identical_configs_have_no_changes() {
        let a = parse("cache_enable = true\ncache_size = 100\n");
        let b = parse("cache_size = 100\ncache_enable = true\n");
        assert!(a.changed_fields(&b).is_empty());
    }

    #[test]
    fn test_changed_fields_names_each_difference() {
        let a = ServiceConfig::default();
        let b = ServiceConfig {
            cache_enable: true,
            discover_arp: false,
            ..ServiceConfig::default()
        };
        assert_eq!(a.changed_fields(&b), vec!["cache_enable", "discover_arp"]);
    }

    #[test]
    fn test_optional_fields_compare_by_value() {
        let a = parse("log_path = \"/var/log/edgedns.log\"\n");
        let b = parse("log_path = \"/var/log/edgedns.log\"\n");
        let c = parse("");
        assert!(a.changed_fields(&b).is_empty());
        assert_eq!(a.changed_fields(&c), vec!["log_path"]);
    }

    #[test]
    fn test_unknown_keys_are_compared() {
        let a = parse("upstream_timeout = 5\n");
        let b = parse("upstream_timeout = 6\n");
        let c = parse("");
        assert_eq!(a.changed_fields(&b), vec!["extra.upstream_timeout"]);
        assert_eq!(c.changed_fields(&a), vec!["extra.upstream_timeout"]);
        assert!(a.changed_fields(&a.clone()).is_empty());
    }

    #[test]
    fn test_nested_unknown_values_compare_deeply() {
        let a = parse("[tags]\nsite = \"home\"\n");
        let b = parse("[tags]\nsite = \"home\"\n");
        let c = parse("[tags]\nsite = \"office\"\n");
        assert!(a.changed_fields(&b).is_empty());
        assert_eq!(a.changed_fields(&c), vec!["extra.tags"]);
    }

    #[test]
    fn test_nan_unknown_value_is_unchanged() {
        let a = parse("weight = nan\nlimits = [1.5, nan]\n");
        assert!(a.changed_fields(&a.clone()).is_empty());
        assert_eq!(
            a.changed_fields(&parse("weight = 1.0\nlimits = [1.5, nan]\n")),
            vec!["extra.weight"]
        );
    }

    #[test]
    fn test_validation_rejects_zero_cache_size() {
        let cfg = ServiceConfig {
            cache_enable: true,
            cache_size: 0,
            ..ServiceConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_interface() {
        let cfg = ServiceConfig {
            interface: Some(String::new()),
            ..ServiceConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
