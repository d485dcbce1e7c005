//! Scriptable [`RemoteApi`] for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use edgedns_core::BoxFuture;
use edgedns_core::remote::{LogsRequest, RemoteApi, RemoteError, ResolverConfig};

/// A fake remote authority.
///
/// Issues a configurable PIN, can be told to fail either call, and records
/// every log upload it receives.
#[derive(Debug, Default)]
pub struct FakeRemote {
    pin: Mutex<Option<i64>>,
    fail_fetch: AtomicBool,
    fail_send: AtomicBool,
    fetches: AtomicUsize,
    uploads: Mutex<Vec<LogsRequest>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// A remote that issues `pin`.
    pub fn with_pin(pin: i64) -> Self {
        let remote = Self::new();
        remote.set_pin(Some(pin));
        remote
    }

    /// A remote whose calls all fail.
    pub fn offline() -> Self {
        let remote = Self::new();
        remote.set_fail_fetch(true);
        remote.set_fail_send(true);
        remote
    }

    pub fn set_pin(&self, pin: Option<i64>) {
        *self.pin.lock().unwrap_or_else(PoisonError::into_inner) = pin;
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Number of PIN fetches attempted.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Uploads received so far, including failed ones.
    pub fn uploads(&self) -> Vec<LogsRequest> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RemoteApi for FakeRemote {
    fn fetch_resolver_config<'a>(
        &'a self,
        device_id: &'a str,
    ) -> BoxFuture<'a, Result<ResolverConfig, RemoteError>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(RemoteError::Network("remote unreachable".to_string()));
            }
            Ok(ResolverConfig {
                uid: device_id.to_string(),
                deactivation_pin: *self.pin.lock().unwrap_or_else(PoisonError::into_inner),
            })
        })
    }

    fn send_logs<'a>(&'a self, request: &'a LogsRequest) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            self.uploads
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(RemoteError::Http {
                    status: 502,
                    message: "bad gateway".to_string(),
                });
            }
            Ok(())
        })
    }
}
