//! Shared request/response types for the control socket.
//!
//! These types are serialized as JSON over the Unix domain socket
//! transport. Both the control server (daemon) and client (CLI) use them.

use serde::{Deserialize, Serialize};

use edgedns_config::ConfigChange;

pub use crate::auth::{DeactivationPin, DeactivationRequest};
pub use crate::clients::ClientRecord;

/// Body of a `201` reload response: what needs a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub changes: Vec<ConfigChange>,
}

/// Body of a successful `logs/view` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogViewResponse {
    pub data: String,
}

/// Body of a `logs/send` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSentResponse {
    /// Size of the raw log bundle in bytes.
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Generic error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Outcome of a reload as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadStatus {
    /// Reload fully applied.
    Applied,
    /// Restart the daemon for these changes to take effect.
    RestartRequired(Vec<ConfigChange>),
}

/// Outcome of a deactivation request as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationStatus {
    Allowed,
    /// A PIN is configured but none was supplied.
    PinRequired,
    WrongPin,
    /// The daemon could not decode the request.
    Rejected,
}

/// Outcome of `logs/view`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogView {
    Content(String),
    Empty,
}

/// Outcome of `logs/send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogShipStatus {
    Sent { size: usize },
    /// A previous attempt was too recent.
    Throttled,
    Empty,
}
