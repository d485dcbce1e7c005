//! Client for the remote management API.
//!
//! Two calls are used by the control plane: fetching the resolver
//! configuration for this device (which carries the deactivation PIN) and
//! uploading a diagnostic log bundle. [`RemoteApi`] is object-safe so tests
//! can substitute a fake.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use edgedns_config::RemoteConfig;

use crate::BoxFuture;

/// Errors from remote API calls.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("remote API returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("remote API error: {0}")]
    Api(String),

    #[error("response parse error: {0}")]
    Parse(String),
}

/// Resolver configuration assigned to this device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub uid: String,

    /// PIN guarding deactivation. `None` means no PIN is configured.
    #[serde(default)]
    pub deactivation_pin: Option<i64>,
}

/// A log upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsRequest {
    pub uid: String,
    /// Base64 of the raw log bytes.
    pub log_file: String,
}

/// Calls made against the remote management API.
pub trait RemoteApi: Send + Sync {
    /// Fetch the resolver configuration for `device_id`.
    fn fetch_resolver_config<'a>(
        &'a self,
        device_id: &'a str,
    ) -> BoxFuture<'a, Result<ResolverConfig, RemoteError>>;

    /// Upload a log bundle.
    fn send_logs<'a>(&'a self, request: &'a LogsRequest) -> BoxFuture<'a, Result<(), RemoteError>>;
}

#[derive(Debug, Serialize)]
struct UtilityRequest<'a> {
    uid: &'a str,
    platform: &'a str,
    version: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    body: Option<T>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResolverBody {
    resolver: ResolverConfig,
}

impl<T> ApiEnvelope<T> {
    fn into_result(self) -> Result<Option<T>, RemoteError> {
        if self.success {
            return Ok(self.body);
        }
        let message = self
            .error
            .map(|e| e.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "request was not successful".to_string());
        Err(RemoteError::Api(message))
    }
}

/// [`RemoteApi`] over HTTPS.
pub struct HttpRemoteApi {
    client: Client,
    base_url: String,
}

impl HttpRemoteApi {
    /// Build a client from the `[remote]` config section.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(format!("edgedns/{}", crate::build_info::VERSION))
            .build()
            .map_err(|e| RemoteError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>, RemoteError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RemoteError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiEnvelope<T> = resp
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;
        envelope.into_result()
    }
}

impl RemoteApi for HttpRemoteApi {
    fn fetch_resolver_config<'a>(
        &'a self,
        device_id: &'a str,
    ) -> BoxFuture<'a, Result<ResolverConfig, RemoteError>> {
        Box::pin(async move {
            debug!(device_id, "fetching resolver config");
            let req = UtilityRequest {
                uid: device_id,
                platform: std::env::consts::OS,
                version: crate::build_info::VERSION,
            };
            let body: Option<ResolverBody> = self.post("utility", &req).await?;
            body.map(|b| b.resolver)
                .ok_or_else(|| RemoteError::Parse("missing resolver in response body".to_string()))
        })
    }

    fn send_logs<'a>(&'a self, request: &'a LogsRequest) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            debug!(uid = %request.uid, bytes = request.log_file.len(), "uploading log bundle");
            let _: Option<serde_json::Value> = self.post("logs", request).await?;
            Ok(())
        })
    }
}
