//! # Fare Orchestrator
//!
//! Runs a search from validation to aggregation:
//!
//! 1. validate the search and run parameters;
//! 2. primary pass: one [`DateTask`] per day, admitted through the
//!    [`SpawnThrottle`] and executed against a freshly seeded [`SessionPool`];
//! 3. reconciliation: dates with neither a record nor an explicit no-data
//!    answer are retried once on a second pool, each bounded by a join
//!    timeout;
//! 4. merge both passes (later records win) and hand the sorted rows to the
//!    [`AggregateSink`].
//!
//! Per-task failures never escape a pass; only configuration, primary pool
//! seeding, the sink and a run without any usable answer fail the run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::{RecordSet, SearchParams, ValidationError};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::pacing::Pacing;

use super::pool::{DrainReport, PoolError, PoolStats, SessionPool};
use super::queues::ResultChannel;
use super::runner::TaskRunner;
use super::session::{SessionFactory, SessionPolicy};
use super::sink::{AggregateSink, SinkError, SinkReceipt};
use super::state::NoDataSet;
use super::tasks::{DateTask, Outcome, OutcomeKind};
use super::throttle::{SpawnThrottle, ThrottleError};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid search configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("Session pool could not be seeded: {0}")]
    PoolSeeding(#[source] PoolError),

    #[error("Spawn throttle failed: {0}")]
    Throttle(#[from] ThrottleError),

    #[error("Failed to write results: {0}")]
    Sink(#[from] SinkError),

    #[error("No usable results for any of {expected} date(s)")]
    NoUsableResults { expected: usize, report: Box<RunReport> },
}

/// Run-level knobs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Pool capacity and spawn throttle limit
    pub concurrency: usize,
    pub reconcile: bool,
    /// Bound per task in the reconciliation pass
    pub retry_join_timeout: Duration,
    pub policy: SessionPolicy,
    pub pacing: Pacing,
    pub extract_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.run.concurrency,
            reconcile: config.run.reconcile,
            retry_join_timeout: config.run.retry_join_timeout(),
            policy: config.session.policy(),
            pacing: Pacing::from_config(&config.timing),
            extract_attempts: config.timing.extract_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Primary,
    Reconciliation,
}

impl PassKind {
    const fn pool_label(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Reconciliation => "reconciliation",
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pool_label())
    }
}

/// What happened during one pass
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub pass: PassKind,
    pub tasks: usize,
    pub dispatched: usize,
    /// Never admitted because the run was cancelled
    pub undispatched: usize,
    /// Dropped at the join timeout, or lost to a panic
    pub abandoned: usize,
    pub outcomes: BTreeMap<OutcomeKind, usize>,
    pub recoveries: u32,
    pub pool: PoolStats,
    pub drain: DrainReport,
    pub peak_active_runners: usize,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl PassSummary {
    #[must_use]
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every date has a record or an explicit no-data answer
    Complete,
    /// Some dates are still missing
    Partial,
    /// No records, but the remote side said so explicitly
    NoResultsInRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub record_count: usize,
    pub no_data_dates: BTreeSet<NaiveDate>,
    pub missing_dates: BTreeSet<NaiveDate>,
    pub primary: PassSummary,
    pub reconciliation: Option<PassSummary>,
    pub cancelled: bool,
    pub output: Option<SinkReceipt>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status: {:?}", self.status)?;
        writeln!(f, "Records: {}", self.record_count)?;
        writeln!(f, "No results: {}", join_dates(&self.no_data_dates))?;
        writeln!(f, "Missing: {}", join_dates(&self.missing_dates))?;
        for pass in std::iter::once(&self.primary).chain(self.reconciliation.as_ref()) {
            writeln!(
                f,
                "{} pass: {} task(s), {} abandoned, {} recovery(ies), {:.1}s",
                pass.pass,
                pass.tasks,
                pass.abandoned,
                pass.recoveries,
                pass.elapsed.as_secs_f64()
            )?;
        }
        if self.cancelled {
            writeln!(f, "Run was cancelled")?;
        }
        if let Some(path) = self.output.as_ref().and_then(|receipt| receipt.location.as_ref()) {
            writeln!(f, "Output: {}", path.display())?;
        }
        Ok(())
    }
}

fn join_dates(dates: &BTreeSet<NaiveDate>) -> String {
    if dates.is_empty() {
        return "-".to_string();
    }
    dates.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

pub struct FareOrchestrator {
    config: OrchestratorConfig,
    search: Arc<SearchParams>,
    factory: Arc<dyn SessionFactory>,
    sink: Arc<dyn AggregateSink>,
    cancellation: CancellationToken,
}

impl FareOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        search: SearchParams,
        factory: Arc<dyn SessionFactory>,
        sink: Arc<dyn AggregateSink>,
    ) -> Self {
        Self {
            config,
            search: Arc::new(search),
            factory,
            sink,
            cancellation: CancellationToken::new(),
        }
    }

    /// Uses an externally owned token, e.g. one cancelled on Ctrl-C
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Cancelling stops admission of new tasks; running ones finish
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    #[must_use]
    pub fn search(&self) -> &SearchParams {
        &self.search
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        self.search.validate()?;
        if self.config.concurrency == 0 {
            return Err(ValidationError::InvalidConcurrency.into());
        }
        Ok(())
    }

    pub async fn run(&self) -> Result<RunReport, OrchestratorError> {
        self.validate()?;

        let expected = self.search.expected_dates();
        let nights = self.search.stay_nights;
        info!(
            "🚀 Searching {} for {} date(s) ({} to {}), concurrency {}",
            self.search.route_label(),
            expected.len(),
            self.search.date_from,
            self.search.date_to,
            self.config.concurrency
        );

        let no_data = NoDataSet::new();

        let primary_tasks: Vec<DateTask> = expected.iter().map(|date| DateTask::new(*date, nights)).collect();
        let primary_pool = self
            .seed_pool(PassKind::Primary, primary_tasks.len())
            .await
            .map_err(OrchestratorError::PoolSeeding)?;
        let (mut records, primary) = self
            .run_pass(PassKind::Primary, primary_tasks.clone(), primary_pool, &no_data)
            .await?;

        let mut missing = self.missing_dates(&expected, &records, &no_data).await;
        let mut reconciliation = None;

        if !missing.is_empty() && self.config.reconcile && !self.cancellation.is_cancelled() {
            info!("🔁 Reconciling {} missing date(s)", missing.len());
            let retry_tasks: Vec<DateTask> = primary_tasks
                .iter()
                .filter(|task| missing.contains(&task.date()))
                .map(DateTask::for_retry)
                .collect();

            match self.seed_pool(PassKind::Reconciliation, retry_tasks.len()).await {
                Ok(pool) => {
                    let (retried, summary) = self
                        .run_pass(PassKind::Reconciliation, retry_tasks, pool, &no_data)
                        .await?;
                    records.merge(retried);
                    reconciliation = Some(summary);
                    missing = self.missing_dates(&expected, &records, &no_data).await;
                }
                Err(e) => warn!("⚠️ Skipping reconciliation, {} date(s) stay missing: {}", missing.len(), e),
            }
        }

        let record_dates = records.dates();
        let no_data_dates: BTreeSet<NaiveDate> = no_data
            .snapshot()
            .await
            .into_iter()
            .filter(|date| !record_dates.contains(date))
            .collect();

        let status = if records.is_empty() && !no_data_dates.is_empty() {
            RunStatus::NoResultsInRange
        } else if missing.is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::Partial
        };

        let mut report = RunReport {
            status,
            record_count: records.len(),
            no_data_dates,
            missing_dates: missing,
            primary,
            reconciliation,
            cancelled: self.cancellation.is_cancelled(),
            output: None,
        };

        if records.is_empty() {
            if report.no_data_dates.is_empty() {
                error!("❌ No usable results for {} date(s)", expected.len());
                return Err(OrchestratorError::NoUsableResults {
                    expected: expected.len(),
                    report: Box::new(report),
                });
            }
            info!("🤷 No flights in range; nothing to write");
            return Ok(report);
        }

        let rows = records.into_aggregate();
        report.output = Some(self.sink.write(&rows).await?);

        info!(
            "🏁 Finished: {} record(s), {} without results, {} missing",
            report.record_count,
            report.no_data_dates.len(),
            report.missing_dates.len()
        );
        Ok(report)
    }

    async fn seed_pool(&self, kind: PassKind, task_count: usize) -> Result<SessionPool, PoolError> {
        let capacity = self.config.concurrency.min(task_count);
        SessionPool::seed(
            kind.pool_label(),
            capacity,
            Arc::clone(&self.factory),
            self.config.policy.clone(),
        )
        .await
    }

    /// Dispatches every task, joins them, drains the channel and closes the pool.
    async fn run_pass(
        &self,
        kind: PassKind,
        tasks: Vec<DateTask>,
        pool: SessionPool,
        no_data: &NoDataSet,
    ) -> Result<(RecordSet, PassSummary), OrchestratorError> {
        let started = Instant::now();
        let total = tasks.len();
        let throttle = SpawnThrottle::new(self.config.concurrency);
        let channel = ResultChannel::new();
        let runner = TaskRunner::new(
            pool.clone(),
            Arc::clone(&self.search),
            no_data.clone(),
            self.config.pacing.clone(),
            self.config.extract_attempts,
        );
        let join_limit = (kind == PassKind::Reconciliation).then_some(self.config.retry_join_timeout);

        let mut handles = Vec::with_capacity(total);
        let mut undispatched = 0;

        for (index, task) in tasks.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = self.cancellation.cancelled() => {
                    undispatched = total - index;
                    warn!("🛑 {} pass cancelled, {} task(s) not dispatched", kind, undispatched);
                    break;
                }
                permit = throttle.admit() => permit?,
            };

            let runner = runner.clone();
            let sender = channel.sender();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let report = match join_limit {
                    None => runner.run(task).await,
                    Some(limit) => match timeout(limit, runner.run(task)).await {
                        Ok(report) => report,
                        Err(_) => {
                            warn!("⏱️ Abandoned {} after {:?}", task, limit);
                            return false;
                        }
                    },
                };
                sender.send(report);
                true
            }));
        }

        let dispatched = handles.len();
        let mut abandoned = 0;
        for joined in join_all(handles).await {
            match joined {
                Ok(true) => {}
                Ok(false) => abandoned += 1,
                Err(e) => {
                    error!("Task runner of the {} pass panicked: {}", kind, e);
                    abandoned += 1;
                }
            }
        }

        throttle.close();
        let reports = channel.drain();
        let pool_stats = pool.stats();
        let drain = pool.drain_and_close().await;

        let mut records = RecordSet::new();
        let mut outcomes = BTreeMap::new();
        let mut recoveries = 0;
        for report in reports {
            *outcomes.entry(report.outcome.kind()).or_insert(0) += 1;
            recoveries += report.recoveries;
            if let Outcome::Record(record) = report.outcome {
                records.insert(record);
            }
        }

        let summary = PassSummary {
            pass: kind,
            tasks: total,
            dispatched,
            undispatched,
            abandoned,
            outcomes,
            recoveries,
            pool: pool_stats,
            drain,
            peak_active_runners: throttle.peak_active(),
            elapsed: started.elapsed(),
        };
        info!(
            "📊 {} pass: {}/{} dispatched, {} record(s), {} abandoned",
            kind,
            dispatched,
            total,
            records.len(),
            abandoned
        );
        Ok((records, summary))
    }

    /// `expected − records − no_data`
    async fn missing_dates(
        &self,
        expected: &[NaiveDate],
        records: &RecordSet,
        no_data: &NoDataSet,
    ) -> BTreeSet<NaiveDate> {
        let answered = no_data.snapshot().await;
        expected
            .iter()
            .filter(|date| !records.contains(date) && !answered.contains(date))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawling::sink::MemorySink;
    use crate::test_utils::{ScriptedFactory, search_between};

    fn orchestrator(search: SearchParams, concurrency: usize) -> FareOrchestrator {
        let config = OrchestratorConfig {
            concurrency,
            ..OrchestratorConfig::default()
        };
        FareOrchestrator::new(
            config,
            search,
            Arc::new(ScriptedFactory::new()),
            Arc::new(MemorySink::new()),
        )
    }

    #[tokio::test]
    async fn test_rejects_reversed_range() {
        let orchestrator = orchestrator(search_between("2025-01-05", "2025-01-01"), 2);
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Config(ValidationError::InvalidDateRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_zero_concurrency() {
        let orchestrator = orchestrator(search_between("2025-01-01", "2025-01-02"), 0);
        assert!(matches!(
            orchestrator.validate(),
            Err(OrchestratorError::Config(ValidationError::InvalidConcurrency))
        ));
    }

    #[test]
    fn test_report_display_lists_dates() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
        let report = RunReport {
            status: RunStatus::Partial,
            record_count: 2,
            no_data_dates: BTreeSet::new(),
            missing_dates: BTreeSet::from([date]),
            primary: PassSummary {
                pass: PassKind::Primary,
                tasks: 3,
                dispatched: 3,
                undispatched: 0,
                abandoned: 0,
                outcomes: BTreeMap::new(),
                recoveries: 0,
                pool: PoolStats::default(),
                drain: DrainReport::default(),
                peak_active_runners: 2,
                elapsed: Duration::from_secs(3),
            },
            reconciliation: None,
            cancelled: false,
            output: None,
        };

        let text = report.to_string();
        assert!(text.contains("Missing: 2025-01-03"));
        assert!(text.contains("No results: -"));
        assert!(text.contains("primary pass: 3 task(s)"));
    }
}
