//! # Spawn Throttle
//!
//! Caps how many task runners are alive at once, independent of the pool
//! size. A counting semaphore: `admit` waits for a free permit and dropping
//! the returned [`ThrottlePermit`] releases it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThrottleError {
    #[error("Spawn throttle is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct SpawnThrottle {
    semaphore: Arc<Semaphore>,
    limit: usize,
    counters: Arc<Counters>,
}

impl SpawnThrottle {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Suspends until fewer than `limit` runners are active.
    pub async fn admit(&self) -> Result<ThrottlePermit, ThrottleError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ThrottleError::Closed)?;

        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(active, Ordering::SeqCst);

        Ok(ThrottlePermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Rejects every pending and future `admit`
    pub fn close(&self) {
        self.semaphore.close();
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}

/// Admission ticket; dropping it is the release
#[derive(Debug)]
pub struct ThrottlePermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}
