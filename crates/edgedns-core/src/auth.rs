//! Deactivation PIN check.
//!
//! Deactivating the daemon (stopping or uninstalling it) may be guarded by a
//! PIN issued by the remote management authority. The decision flow:
//!
//! ```text
//! no device id ───────────────────────────────▶ Allow (standalone)
//! device id ─▶ refresh PIN from remote (best effort)
//!             ├─ cached PIN unset ────────────▶ Allow (no PIN)
//!             └─ decode request body
//!                 ├─ malformed ───────────────▶ Malformed
//!                 ├─ submitted == cached ─────▶ Allow
//!                 ├─ submitted unset ─────────▶ PinOmitted
//!                 └─ otherwise ───────────────▶ PinMismatch
//! ```

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::remote::RemoteApi;

/// Wire value meaning "no PIN". The CLI sends it when `--pin` is omitted.
pub const PIN_UNSET: i64 = -1;

/// A deactivation PIN. On the wire this is a plain integer, with
/// [`PIN_UNSET`] standing for [`DeactivationPin::Unset`].
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum DeactivationPin {
    #[default]
    Unset,
    Code(i64),
}

impl From<i64> for DeactivationPin {
    fn from(value: i64) -> Self {
        if value == PIN_UNSET {
            Self::Unset
        } else {
            Self::Code(value)
        }
    }
}

impl From<DeactivationPin> for i64 {
    fn from(pin: DeactivationPin) -> Self {
        match pin {
            DeactivationPin::Unset => PIN_UNSET,
            DeactivationPin::Code(code) => code,
        }
    }
}

impl From<Option<i64>> for DeactivationPin {
    fn from(value: Option<i64>) -> Self {
        value.map(Self::from).unwrap_or(Self::Unset)
    }
}

impl fmt::Debug for DeactivationPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("Unset"),
            Self::Code(_) => f.write_str("Code([REDACTED])"),
        }
    }
}

/// Body of a deactivation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivationRequest {
    pub pin: DeactivationPin,
}

/// Why a deactivation was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    /// No device identifier: the daemon is not centrally managed.
    Standalone,
    /// Managed, but no PIN is configured.
    NoPin,
    /// The submitted PIN matched.
    PinMatched,
}

/// Outcome of a deactivation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationDecision {
    Allow(AllowReason),
    /// A PIN is required but the caller submitted the "unset" marker.
    PinOmitted,
    /// The submitted PIN is wrong.
    PinMismatch,
    /// The request body could not be decoded.
    Malformed,
}

/// Compare a submitted PIN against the cached one.
pub fn check_pin(cached: DeactivationPin, submitted: DeactivationPin) -> DeactivationDecision {
    if submitted == cached {
        DeactivationDecision::Allow(AllowReason::PinMatched)
    } else if submitted == DeactivationPin::Unset {
        DeactivationDecision::PinOmitted
    } else {
        DeactivationDecision::PinMismatch
    }
}

/// Holds the process-wide PIN cache and decides deactivation requests.
pub struct Authenticator {
    device_id: Option<String>,
    pin: RwLock<DeactivationPin>,
    remote: Arc<dyn RemoteApi>,
}

impl Authenticator {
    /// `device_id` of `None` puts the authenticator in standalone mode.
    pub fn new(device_id: Option<String>, remote: Arc<dyn RemoteApi>) -> Self {
        Self {
            device_id: device_id.filter(|id| !id.is_empty()),
            pin: RwLock::new(DeactivationPin::Unset),
            remote,
        }
    }

    /// Seed the cache, e.g. from the PIN fetched at startup.
    pub fn with_pin(self, pin: DeactivationPin) -> Self {
        self.store_pin(pin);
        self
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn cached_pin(&self) -> DeactivationPin {
        *self.pin.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store_pin(&self, pin: DeactivationPin) {
        *self.pin.write().unwrap_or_else(PoisonError::into_inner) = pin;
    }

    /// Re-fetch the PIN from the remote authority. Failures are logged and
    /// leave the cached value untouched.
    pub async fn refresh(&self) {
        let Some(device_id) = self.device_id.as_deref() else {
            return;
        };
        match self.remote.fetch_resolver_config(device_id).await {
            Ok(resolver) => {
                let pin = DeactivationPin::from(resolver.deactivation_pin);
                debug!(pin_set = pin != DeactivationPin::Unset, "refreshed deactivation pin");
                self.store_pin(pin);
            }
            Err(e) => {
                warn!(error = %e, "could not re-fetch deactivation pin code");
            }
        }
    }

    /// Decide a deactivation request carrying `body`.
    pub async fn authorize(&self, body: &[u8]) -> DeactivationDecision {
        if self.device_id.is_none() {
            return DeactivationDecision::Allow(AllowReason::Standalone);
        }

        self.refresh().await;

        let cached = self.cached_pin();
        if cached == DeactivationPin::Unset {
            return DeactivationDecision::Allow(AllowReason::NoPin);
        }

        let request: DeactivationRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "invalid deactivation request");
                return DeactivationDecision::Malformed;
            }
        };

        check_pin(cached, request.pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxFuture;
    use crate::remote::{LogsRequest, RemoteError, ResolverConfig};
    use pretty_assertions::assert_eq;

    /// Remote that always fails, so the cached PIN is what gets checked.
    struct Offline;

    impl RemoteApi for Offline {
        fn fetch_resolver_config<'a>(
            &'a self,
            _device_id: &'a str,
        ) -> BoxFuture<'a, Result<ResolverConfig, RemoteError>> {
            Box::pin(async { Err(RemoteError::Network("offline".to_string())) })
        }

        fn send_logs<'a>(&'a self, _request: &'a LogsRequest) -> BoxFuture<'a, Result<(), RemoteError>> {
            Box::pin(async { Err(RemoteError::Network("offline".to_string())) })
        }
    }

    /// Remote that reports a fixed PIN.
    struct Issuing(Option<i64>);

    impl RemoteApi for Issuing {
        fn fetch_resolver_config<'a>(
            &'a self,
            device_id: &'a str,
        ) -> BoxFuture<'a, Result<ResolverConfig, RemoteError>> {
            let pin = self.0;
            Box::pin(async move {
                Ok(ResolverConfig {
                    uid: device_id.to_string(),
                    deactivation_pin: pin,
                })
            })
        }

        fn send_logs<'a>(&'a self, _request: &'a LogsRequest) -> BoxFuture<'a, Result<(), RemoteError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn body(pin: i64) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({ "pin": pin })).unwrap()
    }

    #[test]
    fn test_pin_wire_format() {
        assert_eq!(DeactivationPin::from(PIN_UNSET), DeactivationPin::Unset);
        assert_eq!(DeactivationPin::from(1234), DeactivationPin::Code(1234));
        assert_eq!(i64::from(DeactivationPin::Unset), PIN_UNSET);

        let req: DeactivationRequest = serde_json::from_str(r#"{"pin": -1}"#).unwrap();
        assert_eq!(req.pin, DeactivationPin::Unset);
        let json = serde_json::to_string(&DeactivationRequest {
            pin: DeactivationPin::Code(42),
        })
        .unwrap();
        assert_eq!(json, r#"{"pin":42}"#);
    }

    #[test]
    fn test_pin_debug_is_redacted() {
        let debug = format!("{:?}", DeactivationPin::Code(987654));
        assert!(!debug.contains("987654"));
    }

    #[test]
    fn test_check_pin() {
        let cached = DeactivationPin::Code(1234);
        assert_eq!(
            check_pin(cached, DeactivationPin::Code(1234)),
            DeactivationDecision::Allow(AllowReason::PinMatched)
        );
        assert_eq!(
            check_pin(cached, DeactivationPin::Unset),
            DeactivationDecision::PinOmitted
        );
        assert_eq!(
            check_pin(cached, DeactivationPin::Code(9999)),
            DeactivationDecision::PinMismatch
        );
    }

    #[tokio::test]
    async fn test_standalone_always_allows() {
        let auth = Authenticator::new(None, Arc::new(Offline)).with_pin(DeactivationPin::Code(1234));
        assert_eq!(
            auth.authorize(b"garbage").await,
            DeactivationDecision::Allow(AllowReason::Standalone)
        );
    }

    #[tokio::test]
    async fn test_empty_device_id_is_standalone() {
        let auth = Authenticator::new(Some(String::new()), Arc::new(Offline));
        assert!(auth.device_id().is_none());
    }

    #[tokio::test]
    async fn test_unset_pin_allows_without_body() {
        let auth = Authenticator::new(Some("dev".to_string()), Arc::new(Issuing(None)))
            .with_pin(DeactivationPin::Code(1234));
        assert_eq!(
            auth.authorize(b"").await,
            DeactivationDecision::Allow(AllowReason::NoPin)
        );
        assert_eq!(auth.cached_pin(), DeactivationPin::Unset);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_cached_pin() {
        let auth = Authenticator::new(Some("dev".to_string()), Arc::new(Offline))
            .with_pin(DeactivationPin::Code(1234));
        assert_eq!(auth.authorize(&body(9999)).await, DeactivationDecision::PinMismatch);
        assert_eq!(auth.cached_pin(), DeactivationPin::Code(1234));
    }

    #[tokio::test]
    async fn test_refreshed_pin_is_used() {
        let auth = Authenticator::new(Some("dev".to_string()), Arc::new(Issuing(Some(4321))))
            .with_pin(DeactivationPin::Code(1234));
        assert_eq!(
            auth.authorize(&body(4321)).await,
            DeactivationDecision::Allow(AllowReason::PinMatched)
        );
    }

    #[tokio::test]
    async fn test_pin_outcomes() {
        let auth = Authenticator::new(Some("dev".to_string()), Arc::new(Issuing(Some(1234))));
        assert_eq!(
            auth.authorize(&body(1234)).await,
            DeactivationDecision::Allow(AllowReason::PinMatched)
        );
        assert_eq!(auth.authorize(&body(PIN_UNSET)).await, DeactivationDecision::PinOmitted);
        assert_eq!(auth.authorize(&body(9999)).await, DeactivationDecision::PinMismatch);
        assert_eq!(auth.authorize(b"{not json").await, DeactivationDecision::Malformed);
        assert_eq!(auth.authorize(b"").await, DeactivationDecision::Malformed);
    }
}
