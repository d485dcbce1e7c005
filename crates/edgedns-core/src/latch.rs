//! One-shot signals with bounded waits.
//!
//! A [`Latch`] is set at most once (e.g. "startup finished", "DNS bound to
//! the interface") and can be awaited by any number of request handlers,
//! before or after it fires. Every wait carries an explicit bound so no
//! handler can block forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Why a bounded wait ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("signal source closed before firing")]
    Closed,
}

/// A write-once value that can be awaited with a timeout.
#[derive(Debug)]
pub struct Latch<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Latch<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone> Latch<T> {
    /// Create an unset latch.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Set the latch. Returns `false` if it had already fired; the first
    /// value wins.
    pub fn fire(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    /// The value, if the latch has fired.
    pub fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Whether the latch has fired.
    pub fn is_fired(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until the latch fires or `timeout` elapses.
    pub async fn wait(&self, timeout: Duration) -> Result<T, WaitError> {
        let mut rx = self.tx.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => value.clone().ok_or(WaitError::Closed),
            Ok(Err(_)) => Err(WaitError::Closed),
            Err(_) => Err(WaitError::TimedOut(timeout)),
        }
    }
}

impl<T: Clone> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}
