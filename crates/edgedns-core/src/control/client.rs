//! Control client: connects to the daemon over a Unix domain socket.
//!
//! Provides a typed client for the CLI. Uses `hyper` for HTTP/1.1 over the
//! Unix socket and maps the daemon's status codes back to domain results.

use std::path::PathBuf;

use hyper::StatusCode;
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tracing::debug;

use super::server::{
    CLIENTS_PATH, DEACTIVATION_PATH, IDENTITY_PATH, INTERFACE_PATH, LOGS_SEND_PATH,
    LOGS_VIEW_PATH, NO_LOG_CONTENT, RELOAD_PATH, STARTED_PATH,
};
use super::types::*;

/// Errors from the control client.
#[derive(Debug, thiserror::Error)]
pub enum ControlClientError {
    #[error("failed to connect to daemon socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("daemon is not running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("daemon returned {status}: {message}")]
    Daemon { status: StatusCode, message: String },
}

/// Client for talking to the edgedns daemon via its control socket.
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    /// Create a new control client targeting the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Check if the daemon socket exists (daemon is likely running).
    pub fn daemon_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Send an HTTP request over the Unix socket and return status and body.
    async fn request(
        &self,
        method: hyper::Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), ControlClientError> {
        if !self.daemon_available() {
            return Err(ControlClientError::NotRunning(self.socket_path.clone()));
        }

        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            ControlClientError::Connect {
                path: self.socket_path.clone(),
                source: e,
            }
        })?;

        let io = TokioIo::new(stream);

        let (mut sender, conn) =
            hyper::client::conn::http1::handshake::<_, http_body_util::Full<Bytes>>(io)
                .await
                .map_err(|e| ControlClientError::Request(format!("HTTP handshake failed: {e}")))?;

        // Drive the connection in the background
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!(error = %e, "control connection error");
            }
        });

        debug!(%method, path, "control request");

        let mut builder = hyper::Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }

        let req = builder
            .body(http_body_util::Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| ControlClientError::Request(format!("failed to build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ControlClientError::Request(format!("request failed: {e}")))?;

        let status = resp.status();
        let resp_body = http_body_util::BodyExt::collect(resp.into_body())
            .await
            .map_err(|e| {
                ControlClientError::Request(format!("failed to read response body: {e}"))
            })?
            .to_bytes();

        Ok((status, resp_body))
    }

    async fn get(&self, path: &str) -> Result<(StatusCode, Bytes), ControlClientError> {
        self.request(hyper::Method::GET, path, None).await
    }

    async fn post(
        &self,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), ControlClientError> {
        self.request(hyper::Method::POST, path, body).await
    }

    // ── Typed API methods ──────────────────────────────────────────────

    /// List observed DNS clients, sorted by IP.
    pub async fn clients(&self) -> Result<Vec<ClientRecord>, ControlClientError> {
        let (status, body) = self.get(CLIENTS_PATH).await?;
        expect_ok(status, &body)?;
        parse(&body, "clients")
    }

    /// Wait (server side, bounded) for the daemon to finish starting.
    pub async fn started(&self) -> Result<(), ControlClientError> {
        let (status, body) = self.get(STARTED_PATH).await?;
        expect_ok(status, &body)
    }

    /// Reload the daemon's configuration.
    pub async fn reload(&self) -> Result<ReloadStatus, ControlClientError> {
        let (status, body) = self.post(RELOAD_PATH, None).await?;
        match status {
            StatusCode::OK => Ok(ReloadStatus::Applied),
            StatusCode::CREATED => {
                let resp: ReloadResponse = parse(&body, "reload")?;
                Ok(ReloadStatus::RestartRequired(resp.changes))
            }
            _ => Err(daemon_error(status, &body)),
        }
    }

    /// Ask whether the daemon may be deactivated.
    pub async fn deactivate(
        &self,
        pin: DeactivationPin,
    ) -> Result<DeactivationStatus, ControlClientError> {
        let req = serde_json::to_vec(&DeactivationRequest { pin })
            .map_err(|e| ControlClientError::Parse(format!("failed to serialize request: {e}")))?;
        let (status, body) = self.post(DEACTIVATION_PATH, Some(req)).await?;
        match status {
            StatusCode::OK => Ok(DeactivationStatus::Allowed),
            StatusCode::BAD_REQUEST => Ok(DeactivationStatus::PinRequired),
            StatusCode::FORBIDDEN => Ok(DeactivationStatus::WrongPin),
            StatusCode::PRECONDITION_FAILED => Ok(DeactivationStatus::Rejected),
            _ => Err(daemon_error(status, &body)),
        }
    }

    /// The device identifier the daemon runs under.
    pub async fn identity(&self) -> Result<String, ControlClientError> {
        let (status, body) = self.get(IDENTITY_PATH).await?;
        expect_ok(status, &body)?;
        parse(&body, "identity")
    }

    /// The interface DNS is bound to.
    pub async fn interface(&self) -> Result<String, ControlClientError> {
        let (status, body) = self.get(INTERFACE_PATH).await?;
        expect_ok(status, &body)?;
        parse(&body, "interface")
    }

    /// Fetch the diagnostic log.
    pub async fn view_logs(&self) -> Result<LogView, ControlClientError> {
        let (status, body) = self.get(LOGS_VIEW_PATH).await?;
        if status == NO_LOG_CONTENT {
            return Ok(LogView::Empty);
        }
        expect_ok(status, &body)?;
        let resp: LogViewResponse = parse(&body, "logs view")?;
        Ok(LogView::Content(resp.data))
    }

    /// Ask the daemon to upload its diagnostic log.
    pub async fn send_logs(&self) -> Result<LogShipStatus, ControlClientError> {
        let (status, body) = self.post(LOGS_SEND_PATH, None).await?;
        match status {
            StatusCode::OK => {
                let resp: LogSentResponse = parse(&body, "logs send")?;
                Ok(LogShipStatus::Sent { size: resp.size })
            }
            StatusCode::SERVICE_UNAVAILABLE => Ok(LogShipStatus::Throttled),
            s if s == NO_LOG_CONTENT => Ok(LogShipStatus::Empty),
            StatusCode::INTERNAL_SERVER_ERROR => {
                let resp: LogSentResponse = parse(&body, "logs send")?;
                Err(ControlClientError::Daemon {
                    status,
                    message: resp
                        .error
                        .unwrap_or_else(|| "log upload failed".to_string()),
                })
            }
            _ => Err(daemon_error(status, &body)),
        }
    }
}

fn parse<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T, ControlClientError> {
    serde_json::from_slice(body).map_err(|e| ControlClientError::Parse(format!("{what}: {e}")))
}

fn expect_ok(status: StatusCode, body: &[u8]) -> Result<(), ControlClientError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(daemon_error(status, body))
    }
}

fn daemon_error(status: StatusCode, body: &[u8]) -> ControlClientError {
    let message = serde_json::from_slice::<ErrorResponse>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| format!("unexpected status: {status}"));
    ControlClientError::Daemon { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ControlClient::new("/tmp/test-edgedns-control.sock");
        assert!(!client.daemon_available());
    }

    #[tokio::test]
    async fn test_client_not_running_error() {
        let client = ControlClient::new("/tmp/nonexistent-edgedns-control.sock");
        let result = client.started().await;
        assert!(matches!(result, Err(ControlClientError::NotRunning(_))));
    }

    #[test]
    fn test_daemon_error_uses_error_body() {
        let err = daemon_error(StatusCode::BAD_REQUEST, br#"{"error":"no device identifier configured"}"#);
        assert_eq!(
            err.to_string(),
            "daemon returned 400 Bad Request: no device identifier configured"
        );
    }

    #[test]
    fn test_daemon_error_without_body() {
        let err = daemon_error(StatusCode::REQUEST_TIMEOUT, b"");
        assert!(matches!(
            err,
            ControlClientError::Daemon { status: StatusCode::REQUEST_TIMEOUT, .. }
        ));
    }
}
