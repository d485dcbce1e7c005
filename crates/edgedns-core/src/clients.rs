//! Table of DNS clients observed by the daemon.
//!
//! The resolver and the discovery sources (ARP, DHCP leases, mDNS, PTR,
//! hosts file) feed [`ClientTable::upsert`]; the control plane reads
//! snapshots with [`ClientTable::list`].

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::{PoisonError, RwLock};

use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

/// A DNS client, identified by its IP address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientRecord {
    pub ip: IpAddr,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub hostname: String,
    /// Discovery sources that reported this client.
    #[serde(default)]
    pub source: BTreeSet<String>,
    #[serde(default)]
    pub query_count: Option<u64>,
    /// Whether `query_count` is emitted when serializing. Set by the client
    /// listing when per-client query stats are enabled.
    #[serde(skip)]
    pub include_query_count: bool,
}

impl ClientRecord {
    pub fn new(ip: IpAddr, mac: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            ip,
            mac: mac.into(),
            hostname: hostname.into(),
            source: BTreeSet::new(),
            query_count: None,
            include_query_count: false,
        }
    }

    /// Add a discovery source tag.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source.insert(source.into());
        self
    }
}

impl Serialize for ClientRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.include_query_count { 5 } else { 4 };
        let mut st = serializer.serialize_struct("ClientRecord", len)?;
        st.serialize_field("ip", &self.ip)?;
        st.serialize_field("mac", &self.mac)?;
        st.serialize_field("hostname", &self.hostname)?;
        st.serialize_field("source", &self.source)?;
        if self.include_query_count {
            st.serialize_field("query_count", &self.query_count.unwrap_or(0))?;
        } else {
            st.skip_field("query_count")?;
        }
        st.end()
    }
}

/// Concurrent client table keyed by IP.
#[derive(Debug, Default)]
pub struct ClientTable {
    clients: RwLock<HashMap<IpAddr, ClientRecord>>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a client or merge it into the existing entry for the same IP.
    ///
    /// Non-empty MAC and hostname values overwrite older ones; sources
    /// accumulate.
    pub fn upsert(&self, record: ClientRecord) {
        let mut clients = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match clients.get_mut(&record.ip) {
            Some(existing) => {
                if !record.mac.is_empty() {
                    existing.mac = record.mac;
                }
                if !record.hostname.is_empty() {
                    existing.hostname = record.hostname;
                }
                existing.source.extend(record.source);
            }
            None => {
                clients.insert(record.ip, record);
            }
        }
    }

    /// Remove a client. Returns the removed record, if any.
    pub fn remove(&self, ip: &IpAddr) -> Option<ClientRecord> {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(ip)
    }

    /// Snapshot of every client, in no particular order.
    pub fn list(&self) -> Vec<ClientRecord> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_upsert_merges_by_ip() {
        let table = ClientTable::new();
        table.upsert(ClientRecord::new(ip("192.168.1.10"), "aa:bb:cc:dd:ee:ff", "").with_source("arp"));
        table.upsert(ClientRecord::new(ip("192.168.1.10"), "", "laptop").with_source("dhcp"));

        let clients = table.list();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(clients[0].hostname, "laptop");
        assert_eq!(
            clients[0].source.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["arp", "dhcp"]
        );
    }

    #[test]
    fn test_remove() {
        let table = ClientTable::new();
        table.upsert(ClientRecord::new(ip("10.0.0.2"), "", ""));
        assert!(table.remove(&ip("10.0.0.2")).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_query_count_hidden_unless_included() {
        let mut record = ClientRecord::new(ip("10.0.0.2"), "mac", "host");
        record.query_count = Some(42);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("query_count").is_none());

        record.include_query_count = true;
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["query_count"], 42);
    }

    #[test]
    fn test_included_query_count_defaults_to_zero() {
        let mut record = ClientRecord::new(ip("10.0.0.2"), "mac", "host");
        record.include_query_count = true;
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["query_count"], 0);
    }

    #[test]
    fn test_record_roundtrips_through_json() {
        let mut record = ClientRecord::new(ip("fe80::1"), "mac", "host").with_source("mdns");
        record.include_query_count = true;
        record.query_count = Some(3);
        let json = serde_json::to_string(&record).unwrap();
        let back: ClientRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ip, record.ip);
        assert_eq!(back.query_count, Some(3));
        assert!(back.source.contains("mdns"));
    }
}
