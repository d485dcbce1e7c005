//! Core daemon process: startup, reload handling, and shutdown.
//!
//! The [`Daemon`] owns the live state the control plane reads and mutates:
//! the configuration behind a single lock, the client table, query stats,
//! the startup and DNS-binding latches, and the reload request channel.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use edgedns_config::AppConfig;

use crate::clients::ClientTable;
use crate::latch::Latch;
use crate::logging::{LogCollector, LogReader};
use crate::metrics::{MetricsError, QueryStats};
use crate::reload::{ReloadCoordinator, ReloadFailure, ReloadRequest};

/// The live configuration, guarded by one lock. Every multi-step read
/// (such as a reload snapshot) must happen under a single acquisition.
pub type SharedConfig = Arc<Mutex<AppConfig>>;

/// Lock the live configuration, recovering from poisoning.
pub fn lock_config(config: &SharedConfig) -> MutexGuard<'_, AppConfig> {
    config.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Result of pointing the system resolver at the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsBinding {
    /// DNS is bound on this interface.
    Bound { interface: String },
    /// Binding did not happen.
    Failed { reason: String },
}

/// Queue depth for pending reload requests.
const RELOAD_QUEUE: usize = 4;

/// The edgedns daemon.
pub struct Daemon {
    config: SharedConfig,
    config_path: Option<PathBuf>,
    interactive: bool,
    clients: Arc<ClientTable>,
    query_stats: Arc<QueryStats>,
    logs: LogReader,
    started: Latch<()>,
    dns_binding: Latch<DnsBinding>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    reload_tx: mpsc::Sender<ReloadRequest>,
    reload_rx: Mutex<Option<mpsc::Receiver<ReloadRequest>>>,
}

impl Daemon {
    /// Create a daemon with in-memory configuration only. Reloads keep the
    /// current configuration.
    pub fn new(config: AppConfig) -> Result<Self, DaemonError> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (reload_tx, reload_rx) = mpsc::channel(RELOAD_QUEUE);
        let logs = LogCollector::new(config.logging.buffer_capacity).reader();

        Ok(Self {
            config: Arc::new(Mutex::new(config)),
            config_path: None,
            interactive: false,
            clients: Arc::new(ClientTable::new()),
            query_stats: Arc::new(QueryStats::new()?),
            logs,
            started: Latch::new(),
            dns_binding: Latch::new(),
            shutdown_tx,
            reload_tx,
            reload_rx: Mutex::new(Some(reload_rx)),
        })
    }

    /// Create a daemon whose reloads re-read `config_path`.
    pub fn with_config_path(
        config: AppConfig,
        config_path: PathBuf,
    ) -> Result<Self, DaemonError> {
        let mut daemon = Self::new(config)?;
        daemon.config_path = Some(config_path);
        Ok(daemon)
    }

    /// Mark the daemon as running in a foreground session.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Serve logs from this reader (normally a [`LogCollector`] installed
    /// on the global subscriber).
    pub fn with_log_reader(mut self, logs: LogReader) -> Self {
        self.logs = logs;
        self
    }

    /// Run the daemon until a shutdown signal is received.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let mut reload_rx = self
            .reload_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| DaemonError::Startup("daemon is already running".to_string()))?;

        {
            let cfg = lock_config(&self.config);
            info!(
                listeners = cfg.listener.len(),
                managed = cfg.remote.device_id().is_some(),
                interactive = self.interactive,
                "edgedns daemon starting"
            );
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut hangup = hangup_stream()?;

        self.publish_dns_binding();
        self.started.fire(());

        loop {
            tokio::select! {
                Some(request) = reload_rx.recv() => {
                    let result = self.apply_reload().await;
                    let _ = request.done.send(result);
                }
                Some(()) = hangup.recv() => {
                    info!("SIGHUP received, reloading configuration");
                    let _ = self.apply_reload().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping daemon");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("Ctrl-C received, initiating graceful shutdown");
                    let _ = self.shutdown_tx.send(ShutdownSignal);
                    break;
                }
            }
        }

        info!("Daemon stopped");
        Ok(())
    }

    /// Re-read the config file and swap it in.
    async fn apply_reload(&self) -> Result<(), ReloadFailure> {
        let Some(path) = self.config_path.as_deref() else {
            info!("no config file, keeping current configuration");
            return Ok(());
        };

        let next = AppConfig::load(path).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "could not reload configuration");
            ReloadFailure(e.to_string())
        })?;

        *lock_config(&self.config) = next;
        info!(path = %path.display(), "configuration reloaded");
        Ok(())
    }

    fn publish_dns_binding(&self) {
        // Foreground runs never touch the system resolver.
        if self.interactive {
            return;
        }
        let interface = lock_config(&self.config).service.interface.clone();
        let binding = match interface {
            Some(interface) => {
                info!(%interface, "DNS bound to interface");
                DnsBinding::Bound { interface }
            }
            None => {
                warn!("no service interface configured, DNS not bound");
                DnsBinding::Failed {
                    reason: "no interface configured".to_string(),
                }
            }
        };
        self.dns_binding.fire(binding);
    }

    /// Request a graceful shutdown of the daemon.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    /// Subscribe to the shutdown broadcast.
    pub fn shutdown_subscriber(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// A coordinator that reloads this daemon.
    pub fn reload_coordinator(&self) -> ReloadCoordinator {
        ReloadCoordinator::new(Arc::clone(&self.config), self.reload_tx.clone())
    }

    pub fn config(&self) -> SharedConfig {
        Arc::clone(&self.config)
    }

    pub fn clients(&self) -> Arc<ClientTable> {
        Arc::clone(&self.clients)
    }

    pub fn query_stats(&self) -> Arc<QueryStats> {
        Arc::clone(&self.query_stats)
    }

    pub fn logs(&self) -> LogReader {
        self.logs.clone()
    }

    pub fn started(&self) -> Latch<()> {
        self.started.clone()
    }

    pub fn dns_binding(&self) -> Latch<DnsBinding> {
        self.dns_binding.clone()
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }
}

/// Yields one item per SIGHUP. Never yields on non-Unix platforms.
#[cfg(unix)]
fn hangup_stream() -> Result<mpsc::Receiver<()>, DaemonError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sighup = signal(SignalKind::hangup())?;
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        while sighup.recv().await.is_some() {
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

#[cfg(not(unix))]
fn hangup_stream() -> Result<mpsc::Receiver<()>, DaemonError> {
    let (_tx, rx) = mpsc::channel(1);
    Ok(rx)
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon startup failed: {0}")]
    Startup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}
