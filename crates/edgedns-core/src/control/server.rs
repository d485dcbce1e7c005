//! Control server: axum HTTP router over a Unix domain socket.
//!
//! The daemon binds a Unix socket and exposes a JSON API for the CLI to
//! list clients, check readiness, reload, deactivate, and fetch logs.
//! [`ControlServer::bind`] replaces a stale socket file but refuses to
//! take over one a live server is still answering on.

use std::future::{Future, IntoFuture};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::map_response;
use axum::response::Response;
use axum::routing::{get, post};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use edgedns_config::AppConfig;

use super::handlers;
use crate::auth::Authenticator;
use crate::clients::ClientTable;
use crate::daemon::{Daemon, DnsBinding, SharedConfig, lock_config};
use crate::latch::Latch;
use crate::logging::{LogReader, LogSource};
use crate::metrics::ClientMetrics;
use crate::reload::ReloadCoordinator;
use crate::remote::RemoteApi;
use crate::throttle::ShipThrottle;

pub const CLIENTS_PATH: &str = "/clients";
pub const STARTED_PATH: &str = "/started";
pub const RELOAD_PATH: &str = "/reload";
pub const DEACTIVATION_PATH: &str = "/deactivation";
pub const IDENTITY_PATH: &str = "/cd";
pub const INTERFACE_PATH: &str = "/iface";
pub const LOGS_VIEW_PATH: &str = "/logs/view";
pub const LOGS_SEND_PATH: &str = "/logs/send";

/// Status for "no log content". Empty logs are not an error, so this sits
/// outside both the success and error classes.
pub const NO_LOG_CONTENT: StatusCode = StatusCode::MOVED_PERMANENTLY;

/// How long in-flight requests may run after shutdown begins.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Bounds on the blocking handlers.
#[derive(Debug, Clone, Copy)]
pub struct ControlTimeouts {
    /// Readiness wait.
    pub started: Duration,
    /// DNS binding wait.
    pub interface: Duration,
}

impl Default for ControlTimeouts {
    fn default() -> Self {
        Self {
            started: Duration::from_secs(10),
            interface: Duration::from_secs(10),
        }
    }
}

/// Shared state accessible to all control route handlers.
pub struct ControlState {
    pub config: SharedConfig,
    pub clients: Arc<ClientTable>,
    pub metrics: Arc<dyn ClientMetrics>,
    pub started: Latch<()>,
    pub dns_binding: Latch<DnsBinding>,
    pub interactive: bool,
    pub reload: ReloadCoordinator,
    pub auth: Authenticator,
    pub remote: Arc<dyn RemoteApi>,
    pub logs: LogReader,
    pub throttle: ShipThrottle,
    pub timeouts: ControlTimeouts,
}

impl ControlState {
    /// Wire the control plane to a daemon.
    pub fn from_daemon(daemon: &Daemon, remote: Arc<dyn RemoteApi>) -> Self {
        let config = daemon.config();
        let (device_id, ship_interval) = {
            let cfg = lock_config(&config);
            (
                cfg.remote.device_id().map(str::to_string),
                Duration::from_secs(cfg.control.log_ship_interval_secs),
            )
        };

        Self {
            config,
            clients: daemon.clients(),
            metrics: daemon.query_stats(),
            started: daemon.started(),
            dns_binding: daemon.dns_binding(),
            interactive: daemon.is_interactive(),
            reload: daemon.reload_coordinator(),
            auth: Authenticator::new(device_id, Arc::clone(&remote)),
            remote,
            logs: daemon.logs(),
            throttle: ShipThrottle::new(ship_interval),
            timeouts: ControlTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: ControlTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Where the log bundle is read from under the current config.
    pub fn log_source(&self) -> LogSource {
        LogSource::for_service(&lock_config(&self.config).service, &self.logs)
    }

    /// Whether client listings carry query counts.
    pub fn include_query_counts(&self) -> bool {
        lock_config(&self.config).service.metrics_query_stats
    }
}

/// Build the axum router with all control routes.
pub fn router(state: Arc<ControlState>) -> axum::Router {
    axum::Router::new()
        .route(CLIENTS_PATH, get(handlers::list_clients))
        .route(STARTED_PATH, get(handlers::started))
        .route(RELOAD_PATH, post(handlers::reload))
        .route(DEACTIVATION_PATH, post(handlers::deactivation))
        .route(IDENTITY_PATH, get(handlers::identity))
        .route(INTERFACE_PATH, get(handlers::interface))
        .route(LOGS_VIEW_PATH, get(handlers::view_logs))
        .route(LOGS_SEND_PATH, post(handlers::send_logs))
        .layer(map_response(json_content_type))
        .with_state(state)
}

async fn json_content_type(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Resolve the socket path from config.
pub fn socket_path_from_config(config: &AppConfig) -> PathBuf {
    PathBuf::from(&config.control.socket_path)
}

/// Errors from the control server.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("failed to bind control socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("control server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Removes the socket file when dropped, so the path is released on every
/// exit path.
#[derive(Debug)]
struct SocketGuard {
    path: PathBuf,
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        remove_socket(&self.path);
    }
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "control socket removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove control socket"),
    }
}

/// A bound control socket, ready to serve.
#[derive(Debug)]
pub struct ControlServer {
    listener: UnixListener,
    guard: SocketGuard,
}

impl ControlServer {
    /// Bind the control socket at `path`.
    ///
    /// A leftover socket file nobody is listening on is removed first. If a
    /// live server answers on it, binding fails with `AddrInUse`.
    pub async fn bind(path: impl Into<PathBuf>) -> Result<Self, ControlError> {
        let path = path.into();
        let bind_err = |source| ControlError::Bind {
            path: path.clone(),
            source,
        };

        clear_stale_socket(&path).await.map_err(bind_err)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        info!(path = %path.display(), "control server listening");

        Ok(Self {
            listener,
            guard: SocketGuard { path },
        })
    }

    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Serve until `shutdown` resolves.
    ///
    /// On shutdown the socket file is removed and no new connections are
    /// accepted. In-flight requests get [`SHUTDOWN_GRACE`] to finish; after
    /// that they are dropped.
    pub async fn serve<F>(self, state: Arc<ControlState>, shutdown: F) -> Result<(), ControlError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self { listener, guard } = self;
        let socket = guard.path.clone();
        let (stopping_tx, stopping_rx) = oneshot::channel::<()>();

        let server = axum::serve(listener, router(state))
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("control server shutting down");
                remove_socket(&socket);
                let _ = stopping_tx.send(());
            })
            .into_future();
        tokio::pin!(server);

        tokio::select! {
            biased;
            result = &mut server => return result.map_err(ControlError::Serve),
            _ = stopping_rx => {}
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(result) => result.map_err(ControlError::Serve)?,
            Err(_) => warn!(grace = ?SHUTDOWN_GRACE, "in-flight control requests still running, closing"),
        }

        drop(guard);
        info!("control server stopped");
        Ok(())
    }
}

/// Remove a socket file at `path` unless a live server answers on it.
async fn clear_stale_socket(path: &Path) -> std::io::Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }

    if UnixStream::connect(path).await.is_ok() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "another control server is listening on this socket",
        ));
    }

    debug!(path = %path.display(), "removing stale control socket");
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
