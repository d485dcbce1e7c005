//! Control plane: Unix domain socket transport for the CLI.
//!
//! The daemon exposes an HTTP/JSON API over a Unix socket. The CLI connects
//! as a client to list clients, wait for startup, reload, deactivate, and
//! view or ship logs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐         Unix socket        ┌────────────────┐
//! │   CLI    │───────────────────────────▶│ Control Server │
//! │          │  HTTP/1.1 + JSON           │ (axum)         │
//! └──────────┘                            └───────┬────────┘
//!                                                 │
//!                                  ┌──────────────┼──────────────┐
//!                                  ▼              ▼              ▼
//!                              Daemon        Authenticator    RemoteApi
//!                        (config, latches,   (PIN cache)   (PIN, log upload)
//!                         reload channel)
//! ```

pub mod client;
mod handlers;
pub mod server;
pub mod types;

pub use client::{ControlClient, ControlClientError};
pub use server::{
    ControlError, ControlServer, ControlState, ControlTimeouts, NO_LOG_CONTENT, SHUTDOWN_GRACE,
    router,
};
pub use types::*;
