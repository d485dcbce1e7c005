//! Process-wide throttle for log shipping.
//!
//! Log uploads go to a shared remote endpoint, so at most one attempt is
//! admitted per interval. Admission reserves the slot; the reservation only
//! sticks once an upload has actually been transmitted. Attempts that find
//! nothing to send hand the slot back.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Returned when an attempt falls inside the throttle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("throttled, retry in {retry_after:?}")]
pub struct Throttled {
    pub retry_after: Duration,
}

/// Single-slot interval throttle.
#[derive(Debug)]
pub struct ShipThrottle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl ShipThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Admit an attempt, or report how long until the next one may start.
    ///
    /// Check and reservation happen under one lock, so two concurrent
    /// callers can never both be admitted within the same interval. The
    /// returned permit releases the slot when dropped uncommitted.
    pub fn try_acquire(&self) -> Result<ShipPermit<'_>, Throttled> {
        let mut last = self.lock();
        let now = Instant::now();
        if let Some(prev) = *last {
            let since = now.duration_since(prev);
            if since < self.interval {
                return Err(Throttled {
                    retry_after: self.interval - since,
                });
            }
        }
        let previous = last.replace(now);
        Ok(ShipPermit {
            throttle: self,
            admitted: now,
            previous,
            committed: false,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reserved log-ship slot.
#[derive(Debug)]
#[must_use = "dropping a permit without committing releases the slot"]
pub struct ShipPermit<'a> {
    throttle: &'a ShipThrottle,
    admitted: Instant,
    previous: Option<Instant>,
    committed: bool,
}

impl ShipPermit<'_> {
    /// Record a transmission; the interval restarts from now.
    pub fn commit(mut self) {
        *self.throttle.lock() = Some(Instant::now());
        self.committed = true;
    }
}

impl Drop for ShipPermit<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut last = self.throttle.lock();
        if *last == Some(self.admitted) {
            *last = self.previous;
        }
    }
}
