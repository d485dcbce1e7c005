//! Change detection across a reload.
//!
//! A reload re-applies most configuration in place, but listener sockets and
//! service-level settings are only read at start. [`restart_required`]
//! compares a pre-reload snapshot against the live configuration and lists
//! every change that a reload alone cannot apply.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::{ListenerConfig, ServiceConfig};

/// The socket-level identity of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerBinding {
    pub ip: Option<IpAddr>,
    pub port: u16,
}

impl From<&ListenerConfig> for ListenerBinding {
    fn from(l: &ListenerConfig) -> Self {
        Self {
            ip: l.ip,
            port: l.port,
        }
    }
}

impl fmt::Display for ListenerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(IpAddr::V6(ip)) => write!(f, "[{ip}]:{}", self.port),
            Some(ip) => write!(f, "{ip}:{}", self.port),
            None => write!(f, "*:{}", self.port),
        }
    }
}

/// Listener bindings keyed by listener name.
pub type ListenerBindings = BTreeMap<String, ListenerBinding>;

/// A configuration change that needs a process restart to take effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigChange {
    /// A listener exists now that did not before.
    ListenerAdded { name: String },
    /// A listener that existed before is gone.
    ListenerRemoved { name: String },
    /// A listener's address or port changed.
    ListenerRebound {
        name: String,
        before: ListenerBinding,
        after: ListenerBinding,
    },
    /// A service-level setting changed.
    Service { field: String },
}

impl fmt::Display for ConfigChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListenerAdded { name } => write!(f, "listener {name} added"),
            Self::ListenerRemoved { name } => write!(f, "listener {name} removed"),
            Self::ListenerRebound {
                name,
                before,
                after,
            } => write!(f, "listener {name} moved from {before} to {after}"),
            Self::Service { field } => write!(f, "service.{field} changed"),
        }
    }
}

/// Compare two listener snapshots.
pub fn listener_changes(before: &ListenerBindings, after: &ListenerBindings) -> Vec<ConfigChange> {
    let mut changes = Vec::new();
    for (name, now) in after {
        match before.get(name) {
            None => changes.push(ConfigChange::ListenerAdded { name: name.clone() }),
            Some(old) if old != now => changes.push(ConfigChange::ListenerRebound {
                name: name.clone(),
                before: *old,
                after: *now,
            }),
            Some(_) => {}
        }
    }
    // A dropped listener keeps its socket open until the process restarts,
    // so it counts as a change even though nothing new has to be bound.
    for name in before.keys() {
        if !after.contains_key(name) {
            changes.push(ConfigChange::ListenerRemoved { name: name.clone() });
        }
    }
    changes
}

/// Compare two service configurations.
pub fn service_changes(before: &ServiceConfig, after: &ServiceConfig) -> Vec<ConfigChange> {
    before
        .changed_fields(after)
        .into_iter()
        .map(|field| ConfigChange::Service { field })
        .collect()
}

/// Every change between a pre-reload snapshot and the live configuration
/// that only a restart can apply. Empty means the reload fully took effect.
pub fn restart_required(
    listeners_before: &ListenerBindings,
    service_before: &ServiceConfig,
    listeners_after: &ListenerBindings,
    service_after: &ServiceConfig,
) -> Vec<ConfigChange> {
    let mut changes = listener_changes(listeners_before, listeners_after);
    changes.extend(service_changes(service_before, service_after));
    changes
}
