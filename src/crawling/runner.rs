//! # Task Runner
//!
//! Executes one [`DateTask`] against a leased session:
//!
//! `Idle → Navigating → {Blocked → Recovering → Navigating (once) | Extracting}
//!  → {Record | NoData | ExtractionError} → Idle`
//!
//! Every failure becomes an [`Outcome`]; nothing propagates out of `run`.
//! The session goes back to the pool on every exit path: explicitly via
//! `release`, or through the lease drop guard when the runner future is
//! abandoned.

use std::sync::Arc;

use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::domain::{DateWindow, ExtractedFields, FieldValue, Record, SearchParams};
use crate::infrastructure::pacing::Pacing;

use super::pool::{SessionLease, SessionPool};
use super::session::{Session, SessionError};
use super::state::NoDataSet;
use super::tasks::{DateTask, Outcome, TaskReport};

#[derive(Clone)]
pub struct TaskRunner {
    pool: SessionPool,
    search: Arc<SearchParams>,
    no_data: NoDataSet,
    pacing: Pacing,
    extract_attempts: u32,
}

impl TaskRunner {
    #[must_use]
    pub fn new(
        pool: SessionPool,
        search: Arc<SearchParams>,
        no_data: NoDataSet,
        pacing: Pacing,
        extract_attempts: u32,
    ) -> Self {
        Self {
            pool,
            search,
            no_data,
            pacing,
            extract_attempts: extract_attempts.max(1),
        }
    }

    /// Runs one task to exactly one outcome.
    pub async fn run(&self, task: DateTask) -> TaskReport {
        let started = Instant::now();
        let mut recoveries = 0;

        let (outcome, session) = match self.pool.acquire().await {
            Ok(mut lease) => {
                let outcome = self.execute(&task, &mut lease, &mut recoveries).await;
                let session = lease.session().map(Session::id);
                lease.release().await;
                (outcome, session)
            }
            Err(e) => (Outcome::Fatal(format!("session acquisition failed: {e}")), None),
        };

        let elapsed = started.elapsed();
        match &outcome {
            Outcome::Record(_) => info!("✅ {} collected in {:?}", task, elapsed),
            Outcome::NoData => info!("🤷 {} has no results", task),
            other => warn!("⚠️ {} ended with {}", task, other.kind()),
        }

        TaskReport {
            task,
            outcome,
            recoveries,
            elapsed,
            session,
        }
    }

    async fn execute(&self, task: &DateTask, lease: &mut SessionLease, recoveries: &mut u32) -> Outcome {
        let Some(window) = task.window() else {
            return Outcome::Fatal(format!("return date of {task} is out of range"));
        };
        let Some(session) = lease.session_mut() else {
            return Outcome::Fatal("lease carries no session".to_string());
        };

        let url = self.search.url_for(&window);
        let policy = self.pool.policy().clone();
        debug!("Session {} → {}", session.id().short(), url);

        match session.navigate(&url, policy.navigation_timeout).await {
            Ok(()) => {}
            Err(SessionError::NavigationTimeout { .. }) => return Outcome::Timeout,
            Err(e) => return discard(session, format!("navigation failed: {e}")),
        }

        sleep(self.pacing.settle_delay()).await;
        if let Err(e) = session.interact(&self.pacing.interaction_plan()).await {
            debug!("Interaction failed (ignored): {}", e);
        }

        match session.detect_blocking().await {
            Ok(false) => {}
            Ok(true) => {
                *recoveries += 1;
                let steps = self.pacing.interaction_plan();
                if let Err(e) = session.recover(self.pool.factory(), &url, &policy, &steps).await {
                    warn!("Recovery for {} failed: {}", task, e);
                    session.mark_discarded();
                    return Outcome::BlockedUnresolved;
                }
                if !matches!(session.detect_blocking().await, Ok(false)) {
                    session.mark_discarded();
                    return Outcome::BlockedUnresolved;
                }
            }
            Err(e) => return discard(session, format!("blocking check failed: {e}")),
        }

        let load_timeout = self.pacing.load_timeout();
        match timeout(load_timeout, session.wait_until_loaded()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return discard(session, format!("load wait failed: {e}")),
            Err(_) => {
                debug!("{} did not load within {:?}", task, load_timeout);
                return Outcome::Timeout;
            }
        }

        if let Err(e) = session.interact(&self.pacing.post_load_plan()).await {
            debug!("Post-load scrolling failed (ignored): {}", e);
        }

        match session.has_no_results().await {
            Ok(true) => {
                self.no_data.insert(task.date()).await;
                return Outcome::NoData;
            }
            Ok(false) => {}
            Err(e) => return discard(session, format!("no-results check failed: {e}")),
        }

        let mut last_error = None;
        for attempt in 1..=self.extract_attempts {
            match session.extract().await {
                Ok(fields) => return Outcome::Record(self.compose_record(window, fields)),
                Err(e) => {
                    debug!("Extraction attempt {}/{} for {} failed: {}", attempt, self.extract_attempts, task, e);
                    last_error = Some(e);
                    if attempt < self.extract_attempts {
                        sleep(self.pacing.extract_retry_delay()).await;
                    }
                }
            }
        }

        Outcome::ExtractionError(last_error.map_or_else(|| "extraction failed".to_string(), |e| e.to_string()))
    }

    /// Page fields plus the search-level columns of a record
    fn compose_record(&self, window: DateWindow, mut fields: ExtractedFields) -> Record {
        fields.insert(
            "departure_airport".into(),
            FieldValue::Text(self.search.origin.trim().to_ascii_uppercase()),
        );
        fields.insert("arrival_airport".into(), FieldValue::Text(self.search.arrival_label()));
        fields.insert("nights".into(), FieldValue::from(self.search.stay_nights));
        Record::new(window, fields)
    }
}

fn discard(session: &mut Session, reason: String) -> Outcome {
    session.mark_discarded();
    Outcome::Fatal(reason)
}
