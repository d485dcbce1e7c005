//! Per-client query counters.
//!
//! The resolver calls [`QueryStats::record`] for every query it answers.
//! The client listing reads counters back through the [`ClientMetrics`]
//! trait, which keeps the handler independent of the registry behind it.

use std::net::IpAddr;

use prometheus::{IntCounterVec, Opts, Registry};

/// Counter family name in the registry.
pub const CLIENT_QUERIES: &str = "edgedns_client_queries_total";

const CLIENT_LABELS: [&str; 3] = ["ip", "mac", "hostname"];

/// Errors from the metrics registry.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),
}

/// Read access to per-client query counters.
pub trait ClientMetrics: Send + Sync {
    /// Number of queries seen from the client labelled `(ip, mac, hostname)`.
    fn query_count(&self, ip: IpAddr, mac: &str, hostname: &str) -> Result<u64, MetricsError>;
}

/// Query counters, one series per `(ip, mac, hostname)`.
#[derive(Clone)]
pub struct QueryStats {
    registry: Registry,
    queries: IntCounterVec,
}

impl QueryStats {
    /// Create the counter family in a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new())
    }

    /// Create the counter family and register it in `registry`.
    pub fn with_registry(registry: Registry) -> Result<Self, MetricsError> {
        let queries = IntCounterVec::new(
            Opts::new(CLIENT_QUERIES, "DNS queries answered, per client"),
            &CLIENT_LABELS,
        )?;
        registry.register(Box::new(queries.clone()))?;
        Ok(Self { registry, queries })
    }

    /// Count one query from the given client.
    pub fn record(&self, ip: IpAddr, mac: &str, hostname: &str) {
        let ip = ip.to_string();
        self.queries.with_label_values(&[ip.as_str(), mac, hostname]).inc();
    }

    /// Drop every series.
    pub fn reset(&self) {
        self.queries.reset();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for QueryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStats")
            .field("family", &CLIENT_QUERIES)
            .finish_non_exhaustive()
    }
}

impl ClientMetrics for QueryStats {
    fn query_count(&self, ip: IpAddr, mac: &str, hostname: &str) -> Result<u64, MetricsError> {
        let ip = ip.to_string();
        let counter = self
            .queries
            .get_metric_with_label_values(&[ip.as_str(), mac, hostname])?;
        Ok(counter.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_record_and_lookup() {
        let stats = QueryStats::new().unwrap();
        let ip: IpAddr = "192.168.1.20".parse().unwrap();
        stats.record(ip, "aa:bb", "phone");
        stats.record(ip, "aa:bb", "phone");
        assert_eq!(stats.query_count(ip, "aa:bb", "phone").unwrap(), 2);
    }

    #[test]
    fn test_labels_must_all_match() {
        let stats = QueryStats::new().unwrap();
        let ip: IpAddr = "192.168.1.20".parse().unwrap();
        stats.record(ip, "aa:bb", "phone");
        assert_eq!(stats.query_count(ip, "aa:bb", "tablet").unwrap(), 0);
        assert_eq!(stats.query_count(ip, "aa:bb", "phone").unwrap(), 1);
    }

    #[test]
    fn test_reset() {
        let stats = QueryStats::new().unwrap();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        stats.record(ip, "", "");
        stats.reset();
        assert_eq!(stats.query_count(ip, "", "").unwrap(), 0);
    }

    #[test]
    fn test_series_are_labelled_in_registry() {
        let stats = QueryStats::new().unwrap();
        stats.record("10.0.0.2".parse().unwrap(), "aa:bb", "laptop");

        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&stats.registry().gather(), &mut buf)
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(
            text.contains(
                r#"edgedns_client_queries_total{hostname="laptop",ip="10.0.0.2",mac="aa:bb"} 1"#
            ),
            "{text}"
        );
    }

    #[test]
    fn test_family_registers_once_per_registry() {
        let registry = Registry::new();
        assert!(QueryStats::with_registry(registry.clone()).is_ok());
        assert!(matches!(
            QueryStats::with_registry(registry),
            Err(MetricsError::Registry(prometheus::Error::AlreadyReg))
        ));
    }
}
