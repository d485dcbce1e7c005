//! Live reload with verification.
//!
//! A reload re-applies configuration without restarting the process. Not
//! every setting can be applied that way, so the coordinator runs four steps:
//!
//! 1. **Snapshot** listener bindings and service config under the lock.
//! 2. **Signal** the daemon with a [`ReloadRequest`].
//! 3. **Wait** for the request's completion, bounded by a timeout.
//! 4. **Verify** the live config against the snapshot under the lock.
//!
//! If anything a reload cannot apply has changed, the outcome is
//! [`ReloadOutcome::RestartRequired`] and the caller must restart the daemon.
//! A timed-out reload is not rolled back; the daemon may still finish it.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use edgedns_config::diff::restart_required;
use edgedns_config::{ConfigChange, ListenerBindings, ServiceConfig};

use crate::daemon::{SharedConfig, lock_config};

/// How long to wait for the daemon to finish a reload.
pub const RELOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// The daemon failed to apply a reload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ReloadFailure(pub String);

/// A request for the daemon to reload. The daemon answers on `done` once the
/// new configuration is live (or could not be applied).
#[derive(Debug)]
pub struct ReloadRequest {
    pub done: oneshot::Sender<Result<(), ReloadFailure>>,
}

/// Result of a verified reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Everything that changed was applied in place.
    Unchanged,
    /// Some changes only take effect after a restart.
    RestartRequired(Vec<ConfigChange>),
}

/// Errors that abort a reload.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("could not send reload signal: {0}")]
    Signal(String),

    #[error("timeout waiting for reload after {0:?}")]
    Timeout(Duration),

    #[error("daemon dropped the reload request without completing it")]
    Abandoned,

    #[error("reload failed: {0}")]
    Apply(#[from] ReloadFailure),
}

/// Pre-reload copy of the restart-sensitive configuration.
#[derive(Debug, Clone)]
struct Snapshot {
    listeners: ListenerBindings,
    service: ServiceConfig,
}

/// Issues reload requests to the daemon and classifies their outcome.
#[derive(Debug, Clone)]
pub struct ReloadCoordinator {
    config: SharedConfig,
    requests: mpsc::Sender<ReloadRequest>,
    timeout: Duration,
}

impl ReloadCoordinator {
    pub fn new(config: SharedConfig, requests: mpsc::Sender<ReloadRequest>) -> Self {
        Self {
            config,
            requests,
            timeout: RELOAD_TIMEOUT,
        }
    }

    /// Override the completion timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn snapshot(&self) -> Snapshot {
        let cfg = lock_config(&self.config);
        Snapshot {
            listeners: cfg.listener_bindings(),
            service: cfg.service.clone(),
        }
    }

    fn verify(&self, before: &Snapshot) -> ReloadOutcome {
        let cfg = lock_config(&self.config);
        let changes = restart_required(
            &before.listeners,
            &before.service,
            &cfg.listener_bindings(),
            &cfg.service,
        );
        if changes.is_empty() {
            ReloadOutcome::Unchanged
        } else {
            ReloadOutcome::RestartRequired(changes)
        }
    }

    fn timed_out(&self) -> ReloadError {
        warn!(timeout = ?self.timeout, "timeout waiting for reload");
        ReloadError::Timeout(self.timeout)
    }

    /// Run a full reload cycle.
    pub async fn reload(&self) -> Result<ReloadOutcome, ReloadError> {
        let before = self.snapshot();

        // Queueing and completion share one deadline.
        let deadline = Instant::now() + self.timeout;

        let (done, completed) = oneshot::channel();
        match timeout_at(deadline, self.requests.send(ReloadRequest { done })).await {
            Ok(Ok(())) => debug!("reload signal sent"),
            Ok(Err(e)) => return Err(ReloadError::Signal(e.to_string())),
            Err(_) => return Err(self.timed_out()),
        }

        match timeout_at(deadline, completed).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(failure))) => return Err(failure.into()),
            Ok(Err(_)) => return Err(ReloadError::Abandoned),
            Err(_) => return Err(self.timed_out()),
        }

        let outcome = self.verify(&before);
        match &outcome {
            ReloadOutcome::Unchanged => info!("reload applied"),
            ReloadOutcome::RestartRequired(changes) => {
                let changes: Vec<String> = changes.iter().map(ToString::to_string).collect();
                info!(?changes, "reload needs a restart to take full effect");
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use edgedns_config::AppConfig;
    use pretty_assertions::assert_eq;

    fn shared(toml: &str) -> SharedConfig {
        Arc::new(Mutex::new(AppConfig::parse(toml).unwrap()))
    }

    const BASE: &str = r#"
        [listener.0]
        ip = "127.0.0.1"
        port = 53
    "#;

    /// Answer one reload request after replacing the config with `next`.
    fn respond_with(
        config: SharedConfig,
        mut rx: mpsc::Receiver<ReloadRequest>,
        next: &'static str,
    ) {
        tokio::spawn(async move {
            if let Some(req) = rx.recv().await {
                *lock_config(&config) = AppConfig::parse(next).unwrap();
                let _ = req.done.send(Ok(()));
            }
        });
    }

    #[tokio::test]
    async fn test_unchanged_reload() {
        let config = shared(BASE);
        let (tx, rx) = mpsc::channel(1);
        respond_with(config.clone(), rx, BASE);

        let coordinator = ReloadCoordinator::new(config, tx);
        assert_eq!(coordinator.reload().await.unwrap(), ReloadOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_listener_port_change_requires_restart() {
        let config = shared(BASE);
        let (tx, rx) = mpsc::channel(1);
        respond_with(
            config.clone(),
            rx,
            "[listener.0]\nip = \"127.0.0.1\"\nport = 5353\n",
        );

        let coordinator = ReloadCoordinator::new(config, tx);
        let outcome = coordinator.reload().await.unwrap();
        assert!(matches!(
            outcome,
            ReloadOutcome::RestartRequired(ref c) if matches!(c[0], ConfigChange::ListenerRebound { .. })
        ));
    }

    #[tokio::test]
    async fn test_service_change_requires_restart() {
        let config = shared(BASE);
        let (tx, rx) = mpsc::channel(1);
        respond_with(
            config.clone(),
            rx,
            "[listener.0]\nip = \"127.0.0.1\"\nport = 53\n[service]\ncache_enable = true\n",
        );

        let coordinator = ReloadCoordinator::new(config, tx);
        assert_eq!(
            coordinator.reload().await.unwrap(),
            ReloadOutcome::RestartRequired(vec![ConfigChange::Service {
                field: "cache_enable".to_string()
            }])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_at_bound() {
        let config = shared(BASE);
        let (tx, _rx) = mpsc::channel(1);
        let coordinator = ReloadCoordinator::new(config, tx);

        let start = Instant::now();
        let err = coordinator.reload().await.unwrap_err();
        assert!(matches!(err, ReloadError::Timeout(d) if d == RELOAD_TIMEOUT));
        assert!(start.elapsed() >= RELOAD_TIMEOUT);
        assert!(start.elapsed() < RELOAD_TIMEOUT + Duration::from_millis(10));
    }

    /// A queue already holding one request nobody has answered.
    fn full_queue() -> (mpsc::Sender<ReloadRequest>, mpsc::Receiver<ReloadRequest>) {
        let (tx, rx) = mpsc::channel(1);
        let (done, _) = oneshot::channel();
        tx.try_send(ReloadRequest { done }).unwrap();
        (tx, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_waits_for_room() {
        let config = shared(BASE);
        let (tx, mut rx) = full_queue();
        let daemon_config = config.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _stale = rx.recv().await;
            if let Some(req) = rx.recv().await {
                *lock_config(&daemon_config) = AppConfig::parse(BASE).unwrap();
                let _ = req.done.send(Ok(()));
            }
        });

        let coordinator = ReloadCoordinator::new(config, tx);
        assert_eq!(coordinator.reload().await.unwrap(), ReloadOutcome::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_times_out_at_bound() {
        let config = shared(BASE);
        let (tx, _rx) = full_queue();
        let coordinator = ReloadCoordinator::new(config, tx);

        let start = Instant::now();
        let err = coordinator.reload().await.unwrap_err();
        assert!(matches!(err, ReloadError::Timeout(d) if d == RELOAD_TIMEOUT));
        assert!(start.elapsed() < RELOAD_TIMEOUT + Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_closed_channel_is_signal_error() {
        let config = shared(BASE);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let coordinator = ReloadCoordinator::new(config, tx);
        assert!(matches!(
            coordinator.reload().await,
            Err(ReloadError::Signal(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_failure_is_reported() {
        let config = shared(BASE);
        let (tx, mut rx) = mpsc::channel::<ReloadRequest>(1);
        tokio::spawn(async move {
            if let Some(req) = rx.recv().await {
                let _ = req.done.send(Err(ReloadFailure("bad toml".to_string())));
            }
        });
        let coordinator = ReloadCoordinator::new(config, tx);
        let err = coordinator.reload().await.unwrap_err();
        assert_eq!(err.to_string(), "reload failed: bad toml");
    }

    #[tokio::test]
    async fn test_dropped_request_is_abandoned() {
        let config = shared(BASE);
        let (tx, mut rx) = mpsc::channel::<ReloadRequest>(1);
        tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        let coordinator = ReloadCoordinator::new(config, tx);
        assert!(matches!(
            coordinator.reload().await,
            Err(ReloadError::Abandoned)
        ));
    }
}
