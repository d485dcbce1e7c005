#![deny(unsafe_code)]

//! edgedns core daemon runtime.
//!
//! Holds the daemon's live state (configuration, client table, startup
//! latches) and the control plane the CLI talks to over a Unix socket:
//! client listing, readiness, verified reload, PIN-gated deactivation,
//! identity, and diagnostic logs.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future: the return type for async
/// trait methods that require dynamic dispatch (`dyn Trait`).
///
/// Native `async fn` in traits produces opaque return types that are **not**
/// object-safe. Traits consumed via `Arc<dyn Trait>` must return a concrete
/// `Pin<Box<dyn Future>>` instead. This alias keeps those signatures readable.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Deactivation PIN cache and checks.
pub mod auth;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Observed DNS clients.
pub mod clients;
/// Control socket server, handlers, and client.
pub mod control;
/// Daemon runtime and shared state.
pub mod daemon;
/// One-shot signals with bounded waits.
pub mod latch;
/// In-memory log collector and log bundle sources.
pub mod logging;
/// Per-client query counters.
pub mod metrics;
/// Verified live reload.
pub mod reload;
/// Remote management API client.
pub mod remote;
/// Log shipping throttle.
pub mod throttle;

pub use auth::{Authenticator, DeactivationPin};
pub use control::{ControlClient, ControlServer, ControlState};
pub use daemon::Daemon;
pub use latch::Latch;
pub use logging::{LogCollector, LogReader};
pub use reload::{ReloadCoordinator, ReloadOutcome};
pub use remote::{HttpRemoteApi, RemoteApi};
