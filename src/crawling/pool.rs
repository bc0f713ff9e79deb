//! # Session Pool
//!
//! Bounded container of [`Session`]s and the only bound on simultaneous
//! remote interactions. Every slot is either occupied by a session or
//! vacant (a replacement could not be opened); slots are never lost, so
//! `checked_out + available <= capacity` holds at all times.
//!
//! Availability is tracked with a [`Semaphore`] holding one permit per
//! returned slot. A [`SessionLease`] owns the permit and gives its slot
//! back on `release`, or synchronously on drop when the task holding it
//! panicked or was abandoned.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::session::{Session, SessionError, SessionFactory, SessionPolicy, SessionState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Pool '{pool}' could not open any of {requested} session(s): {reason}")]
    SeedingFailed {
        pool: String,
        requested: usize,
        reason: String,
    },

    #[error("Pool has no session slots")]
    Exhausted,

    #[error("Pool is closed")]
    Closed,

    #[error("Vacant slot could not be refilled: {0}")]
    SessionInit(#[from] SessionError),
}

enum Slot {
    Occupied(Session),
    Vacant,
}

struct Slots {
    idle: Vec<Slot>,
    capacity: usize,
    checked_out: usize,
    peak_checked_out: usize,
    replacements: u64,
    closed: bool,
}

struct PoolInner {
    label: String,
    slots: Mutex<Slots>,
    permits: Arc<Semaphore>,
    factory: Arc<dyn SessionFactory>,
    policy: SessionPolicy,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Puts a slot back before its permit is released
    fn return_slot(&self, slot: Slot) {
        let mut slots = self.lock();
        slots.checked_out = slots.checked_out.saturating_sub(1);
        slots.idle.push(slot);
    }

    fn note_replacement(&self) {
        self.lock().replacements += 1;
    }

    async fn open_replacement(&self) -> Slot {
        match Session::create(self.factory.as_ref(), &self.policy).await {
            Ok(session) => {
                self.note_replacement();
                debug!("Pool '{}': replacement session {} opened", self.label, session.id().short());
                Slot::Occupied(session)
            }
            Err(e) => {
                warn!("Pool '{}': replacement failed, slot left vacant: {}", self.label, e);
                Slot::Vacant
            }
        }
    }
}

/// Consistent snapshot of pool occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub capacity: usize,
    /// Sessions ready to be acquired
    pub available: usize,
    /// Returned slots without a session
    pub vacant: usize,
    pub checked_out: usize,
    pub peak_checked_out: usize,
    pub replacements: u64,
}

/// What `drain_and_close` found once every lease was back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub sessions_closed: usize,
    pub vacant_slots: usize,
}

impl DrainReport {
    #[must_use]
    pub const fn slots_returned(&self) -> usize {
        self.sessions_closed + self.vacant_slots
    }
}

#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("label", &self.inner.label)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    /// Opens up to `capacity` sessions concurrently.
    ///
    /// Partial success shrinks the pool to the sessions actually created;
    /// zero successes is [`PoolError::SeedingFailed`].
    pub async fn seed(
        label: impl Into<String>,
        capacity: usize,
        factory: Arc<dyn SessionFactory>,
        policy: SessionPolicy,
    ) -> Result<Self, PoolError> {
        let label = label.into();
        info!("🏊 Seeding pool '{}' with {} session(s)", label, capacity);

        let attempts = (0..capacity).map(|_| Session::create(factory.as_ref(), &policy));
        let mut sessions = Vec::with_capacity(capacity);
        let mut last_error = None;
        for result in join_all(attempts).await {
            match result {
                Ok(session) => sessions.push(session),
                Err(e) => last_error = Some(e),
            }
        }

        if capacity > 0 && sessions.is_empty() {
            return Err(PoolError::SeedingFailed {
                pool: label,
                requested: capacity,
                reason: last_error.map_or_else(|| "unknown".to_string(), |e| e.to_string()),
            });
        }
        if sessions.len() < capacity {
            warn!(
                "⚠️ Pool '{}' shrunk to {} of {} requested session(s)",
                label,
                sessions.len(),
                capacity
            );
        }

        let size = sessions.len();
        let slots = Slots {
            idle: sessions.into_iter().map(Slot::Occupied).collect(),
            capacity: size,
            checked_out: 0,
            peak_checked_out: 0,
            replacements: 0,
            closed: false,
        };

        Ok(Self {
            inner: Arc::new(PoolInner {
                label,
                slots: Mutex::new(slots),
                permits: Arc::new(Semaphore::new(size)),
                factory,
                policy,
            }),
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    #[must_use]
    pub fn factory(&self) -> &dyn SessionFactory {
        self.inner.factory.as_ref()
    }

    #[must_use]
    pub fn policy(&self) -> &SessionPolicy {
        &self.inner.policy
    }

    /// Waits for a free slot and leases its session.
    ///
    /// A vacant slot is refilled here; if that fails the slot goes back
    /// vacant and the error is returned.
    pub async fn acquire(&self) -> Result<SessionLease, PoolError> {
        {
            let slots = self.inner.lock();
            if slots.closed {
                return Err(PoolError::Closed);
            }
            if slots.capacity == 0 {
                return Err(PoolError::Exhausted);
            }
        }

        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let slot = {
            let mut slots = self.inner.lock();
            let Some(slot) = slots.idle.pop() else {
                return Err(PoolError::Exhausted);
            };
            slots.checked_out += 1;
            slots.peak_checked_out = slots.peak_checked_out.max(slots.checked_out);
            slot
        };

        // Drop 시 빈 슬롯으로 반환되도록 lease를 먼저 만든다
        let mut lease = SessionLease {
            session: None,
            pool: Arc::clone(&self.inner),
            permit: Some(permit),
            returned: false,
        };

        match slot {
            Slot::Occupied(session) => lease.session = Some(session),
            Slot::Vacant => {
                let session = Session::create(self.inner.factory.as_ref(), &self.inner.policy).await?;
                self.inner.note_replacement();
                lease.session = Some(session);
            }
        }

        Ok(lease)
    }

    /// Waits for every lease, closes the pool and shuts its sessions down.
    pub async fn drain_and_close(&self) -> DrainReport {
        let capacity = u32::try_from(self.capacity()).unwrap_or(u32::MAX);
        let all_permits = self.inner.permits.acquire_many(capacity).await;

        let idle = {
            let mut slots = self.inner.lock();
            slots.closed = true;
            std::mem::take(&mut slots.idle)
        };
        self.inner.permits.close();
        drop(all_permits);

        let mut report = DrainReport::default();
        for slot in idle {
            match slot {
                Slot::Occupied(mut session) => {
                    session.shutdown().await;
                    report.sessions_closed += 1;
                }
                Slot::Vacant => report.vacant_slots += 1,
            }
        }

        info!(
            "Pool '{}' closed: {} session(s) shut down, {} vacant slot(s)",
            self.inner.label, report.sessions_closed, report.vacant_slots
        );
        report
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let slots = self.inner.lock();
        let available = slots
            .idle
            .iter()
            .filter(|slot| matches!(slot, Slot::Occupied(_)))
            .count();
        PoolStats {
            capacity: slots.capacity,
            available,
            vacant: slots.idle.len() - available,
            checked_out: slots.checked_out,
            peak_checked_out: slots.peak_checked_out,
            replacements: slots.replacements,
        }
    }
}

/// Exclusive use of one pooled session
pub struct SessionLease {
    session: Option<Session>,
    pool: Arc<PoolInner>,
    permit: Option<OwnedSemaphorePermit>,
    returned: bool,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("pool", &self.pool.label)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl SessionLease {
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Returns the session to the pool.
    ///
    /// A discarded session is shut down and replaced first; a failed
    /// replacement leaves the slot vacant.
    pub async fn release(mut self) {
        let slot = match self.session.take() {
            Some(mut session) if session.state() != SessionState::Discarded => {
                session.reset_idle();
                Slot::Occupied(session)
            }
            Some(mut session) => {
                session.shutdown().await;
                self.pool.open_replacement().await
            }
            None => self.pool.open_replacement().await,
        };

        self.pool.return_slot(slot);
        self.returned = true;
        self.permit.take();
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.returned {
            return;
        }

        let slot = match self.session.take() {
            Some(session) if session.state() == SessionState::Idle => Slot::Occupied(session),
            Some(session) => {
                spawn_teardown(session);
                Slot::Vacant
            }
            None => Slot::Vacant,
        };

        self.pool.return_slot(slot);
        self.permit.take();
    }
}

fn spawn_teardown(mut session: Session) {
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                session.shutdown().await;
            });
        }
        Err(_) => debug!("No runtime for teardown of session {}", session.id().short()),
    }
}
