//! Daemon test helpers.
//!
//! Helpers for constructing [`Daemon`] instances in tests with sensible
//! defaults and temporary config files, and for running them with a
//! control server attached.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use edgedns_config::AppConfig;
use edgedns_core::control::{ControlClient, ControlServer, ControlState};
use edgedns_core::{Daemon, RemoteApi};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// A test-scoped daemon with an owned temp directory for config files.
///
/// The temp directory is deleted automatically when this value is dropped,
/// guaranteeing cleanup even on panic.
pub struct TestDaemon {
    pub daemon: Arc<Daemon>,
    pub config_path: PathBuf,
    temp_dir: TempDir,
}

impl TestDaemon {
    /// Create a daemon backed by a temporary config file containing the given
    /// TOML string.
    pub async fn with_toml(toml_content: &str) -> Self {
        Self::build(toml_content, false).await
    }

    /// Same as [`with_toml`](Self::with_toml), marked as running in a
    /// foreground session.
    pub async fn interactive(toml_content: &str) -> Self {
        Self::build(toml_content, true).await
    }

    async fn build(toml_content: &str, interactive: bool) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config_path = temp_dir.path().join("edgedns.toml");
        tokio::fs::write(&config_path, toml_content)
            .await
            .expect("failed to write test config");

        let config = AppConfig::load(&config_path)
            .await
            .expect("failed to parse test config");

        let daemon = Daemon::with_config_path(config, config_path.clone())
            .expect("failed to build test daemon")
            .interactive(interactive);

        Self {
            daemon: Arc::new(daemon),
            config_path,
            temp_dir,
        }
    }

    /// Create a daemon with default config in a temp directory.
    pub async fn default_config() -> Self {
        Self::with_toml("").await
    }

    /// Overwrite the temp config file with new content (for reload testing).
    pub async fn write_config(&self, toml_content: &str) {
        tokio::fs::write(&self.config_path, toml_content)
            .await
            .expect("failed to write updated config");
    }

    /// A path inside the temp directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Spawn [`Daemon::run`] and wait until it reports started.
    pub async fn start(&self) -> JoinHandle<()> {
        let runner = Arc::clone(&self.daemon);
        let handle = tokio::spawn(async move {
            runner.run().await.expect("daemon run failed");
        });
        self.daemon
            .started()
            .wait(Duration::from_secs(5))
            .await
            .expect("daemon did not start");
        handle
    }

    /// Control state wired to this daemon.
    pub fn control_state(&self, remote: Arc<dyn RemoteApi>) -> ControlState {
        ControlState::from_daemon(&self.daemon, remote)
    }

    /// Bind a control server in the temp directory and serve it until the
    /// daemon shuts down. Returns a client for it.
    pub async fn serve_control(
        &self,
        state: ControlState,
    ) -> (ControlClient, JoinHandle<()>) {
        let socket = self.path("control.sock");
        let server = ControlServer::bind(&socket)
            .await
            .expect("failed to bind control socket");

        let mut shutdown = self.daemon.shutdown_subscriber();
        let handle = tokio::spawn(async move {
            server
                .serve(Arc::new(state), async move {
                    let _ = shutdown.recv().await;
                })
                .await
                .expect("control server failed");
        });

        (ControlClient::new(socket), handle)
    }
}
