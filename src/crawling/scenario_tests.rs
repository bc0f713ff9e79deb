//! End-to-end runs of the orchestrator against the scripted backend.
//!
//! The clock is paused, so cooldowns, load timeouts and join timeouts
//! elapse instantly while keeping their ordering.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rstest::rstest;

use super::orchestrator::{FareOrchestrator, OrchestratorConfig, OrchestratorError, RunStatus};
use super::session::SessionPolicy;
use super::sink::{AggregateSink, MemorySink};
use super::tasks::OutcomeKind;
use crate::domain::{FieldValue, SearchParams, enumerate_dates};
use crate::test_utils::{PageBehavior, ScriptedFactory, search_between};

fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

fn config(concurrency: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        concurrency,
        reconcile: true,
        retry_join_timeout: Duration::from_secs(180),
        policy: SessionPolicy {
            init_attempts: 3,
            init_retry_delay: Duration::from_secs(5),
            navigation_timeout: Duration::from_secs(60),
            recovery_cooldown: Duration::from_secs(60),
        },
        ..OrchestratorConfig::default()
    }
}

struct Harness {
    orchestrator: FareOrchestrator,
    factory: ScriptedFactory,
    sink: Arc<MemorySink>,
}

fn harness(search: SearchParams, config: OrchestratorConfig, factory: ScriptedFactory) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let shared: Arc<dyn AggregateSink> = sink.clone();
    let orchestrator = FareOrchestrator::new(config, search, Arc::new(factory.clone()), shared);
    Harness {
        orchestrator,
        factory,
        sink,
    }
}

#[tokio::test(start_paused = true)]
async fn three_days_all_succeed() {
    let h = harness(
        search_between("2025-01-01", "2025-01-03"),
        config(2),
        ScriptedFactory::new(),
    );

    let report = h.orchestrator.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.record_count, 3);
    assert!(report.missing_dates.is_empty());
    assert!(report.no_data_dates.is_empty());
    assert!(report.reconciliation.is_none());
    assert_eq!(report.primary.count(OutcomeKind::Record), 3);
    assert_eq!(report.primary.pool.capacity, 2);

    let rows = h.sink.last().await.unwrap();
    let dates: Vec<NaiveDate> = rows.iter().map(|row| row.date).collect();
    assert_eq!(dates, vec![day("2025-01-01"), day("2025-01-02"), day("2025-01-03")]);
    assert_eq!(rows.rows()[0].fields.get("nights"), Some(&FieldValue::from(5_u32)));
    assert_eq!(h.sink.writes().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn blocked_session_is_recovered_once() {
    let factory = ScriptedFactory::new().script(
        "2025-01-02",
        [PageBehavior::Blocked, PageBehavior::results(150.0, "Recovered Air")],
    );
    let h = harness(search_between("2025-01-01", "2025-01-03"), config(3), factory);

    let report = h.orchestrator.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.record_count, 3);
    assert_eq!(report.primary.recoveries, 1);
    assert_eq!(h.factory.state_clears(), 1);
    // 3 seeded + 1 replacement opened by recovery
    assert_eq!(h.factory.drivers_opened(), 4);

    let rows = h.sink.last().await.unwrap();
    let recovered = rows.iter().find(|row| row.date == day("2025-01-02")).unwrap();
    assert_eq!(recovered.fields.get("price"), Some(&FieldValue::Number(150.0)));
}

#[tokio::test(start_paused = true)]
async fn no_data_date_is_not_retried() {
    let factory = ScriptedFactory::new().script("2025-01-02", [PageBehavior::NoResults]);
    let h = harness(search_between("2025-01-01", "2025-01-03"), config(2), factory);

    let report = h.orchestrator.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.record_count, 2);
    assert_eq!(report.no_data_dates, BTreeSet::from([day("2025-01-02")]));
    assert!(report.missing_dates.is_empty());
    assert!(report.reconciliation.is_none());
    assert_eq!(h.factory.navigations(), 3);
}

#[tokio::test(start_paused = true)]
async fn only_no_data_answers_is_not_an_error() {
    let factory = ScriptedFactory::new().with_default(PageBehavior::NoResults);
    let h = harness(search_between("2025-01-01", "2025-01-02"), config(2), factory);

    let report = h.orchestrator.run().await.unwrap();

    assert_eq!(report.status, RunStatus::NoResultsInRange);
    assert_eq!(report.record_count, 0);
    assert!(report.output.is_none());
    assert!(h.sink.writes().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn seeding_failure_attempts_nothing() {
    let factory = ScriptedFactory::new().always_failing_opens();
    let h = harness(search_between("2025-01-01", "2025-01-03"), config(2), factory);

    let err = h.orchestrator.run().await.unwrap_err();

    assert!(matches!(err, OrchestratorError::PoolSeeding(_)));
    assert_eq!(h.factory.navigations(), 0);
    // 2 sessions × 3 attempts
    assert_eq!(h.factory.open_attempts(), 6);
    assert!(h.sink.writes().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn partial_seeding_shrinks_the_pool() {
    let factory = ScriptedFactory::new().failing_first_opens(1);
    let mut policy_config = config(2);
    policy_config.policy.init_attempts = 1;
    let h = harness(search_between("2025-01-01", "2025-01-04"), policy_config, factory);

    let report = h.orchestrator.run().await.unwrap();

    assert_eq!(report.primary.pool.capacity, 1);
    assert_eq!(report.record_count, 4);
    assert!(report.primary.pool.peak_checked_out <= 1);
}

#[tokio::test(start_paused = true)]
async fn reconciliation_timeout_releases_the_session() {
    let factory = ScriptedFactory::new().script(
        "2025-01-02",
        [PageBehavior::NeverLoads, PageBehavior::HangOnNavigate],
    );
    let mut run_config = config(2);
    run_config.retry_join_timeout = Duration::from_secs(5);
    let h = harness(search_between("2025-01-01", "2025-01-03"), run_config, factory);

    let report = h.orchestrator.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.record_count, 2);
    assert_eq!(report.missing_dates, BTreeSet::from([day("2025-01-02")]));
    assert_eq!(report.primary.count(OutcomeKind::Timeout), 1);

    let retry = report.reconciliation.expect("reconciliation pass ran");
    assert_eq!(retry.tasks, 1);
    assert_eq!(retry.abandoned, 1);
    assert!(retry.outcomes.is_empty());
    assert_eq!(retry.pool.capacity, 1);
    assert_eq!(retry.drain.slots_returned(), retry.pool.capacity);
    assert_eq!(retry.drain.vacant_slots, 1);
    assert!(retry.elapsed < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn reconciliation_recovers_missing_dates() {
    let factory = ScriptedFactory::new().script(
        "2025-01-03",
        [PageBehavior::ExtractionFailure, PageBehavior::results(88.0, "Second Try")],
    );
    let h = harness(search_between("2025-01-01", "2025-01-04"), config(4), factory);

    let report = h.orchestrator.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.record_count, 4);
    assert_eq!(report.primary.count(OutcomeKind::ExtractionError), 1);
    let retry = report.reconciliation.expect("reconciliation pass ran");
    assert_eq!(retry.count(OutcomeKind::Record), 1);
    assert_eq!(retry.pool.capacity, 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_reconciliation_leaves_dates_missing() {
    let factory = ScriptedFactory::new().script("2025-01-01", [PageBehavior::ExtractionFailure]);
    let mut run_config = config(2);
    run_config.reconcile = false;
    let h = harness(search_between("2025-01-01", "2025-01-02"), run_config, factory);

    let report = h.orchestrator.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    assert!(report.reconciliation.is_none());
    assert_eq!(report.missing_dates, BTreeSet::from([day("2025-01-01")]));
}

#[tokio::test(start_paused = true)]
async fn retry_pool_seeding_failure_is_not_fatal() {
    let factory = ScriptedFactory::new().script("2025-01-02", [PageBehavior::ExtractionFailure]);
    let h = harness(search_between("2025-01-01", "2025-01-02"), config(2), factory.clone());

    let run = h.orchestrator.run();
    tokio::pin!(run);
    // Primary pass sessions are open once the first navigation happened
    loop {
        tokio::select! {
            _ = &mut run => panic!("run finished before the backend went down"),
            () = tokio::time::sleep(Duration::from_millis(100)) => {
                if factory.navigations() >= 2 {
                    factory.set_open_failures(true);
                    break;
                }
            }
        }
    }
    let report = run.await.unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    assert!(report.reconciliation.is_none());
    assert_eq!(report.record_count, 1);
    assert_eq!(report.missing_dates, BTreeSet::from([day("2025-01-02")]));
}

#[tokio::test(start_paused = true)]
async fn systemic_failure_is_an_error() {
    let factory = ScriptedFactory::new().with_default(PageBehavior::ExtractionFailure);
    let h = harness(search_between("2025-01-01", "2025-01-03"), config(2), factory);

    let err = h.orchestrator.run().await.unwrap_err();

    let OrchestratorError::NoUsableResults { expected, report } = err else {
        panic!("expected NoUsableResults, got {err:?}");
    };
    assert_eq!(expected, 3);
    assert_eq!(report.missing_dates.len(), 3);
    assert!(report.reconciliation.is_some());
    assert!(h.sink.writes().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_dispatches_nothing() {
    let h = harness(
        search_between("2025-01-01", "2025-01-05"),
        config(2),
        ScriptedFactory::new(),
    );
    h.orchestrator.cancellation_token().cancel();

    let err = h.orchestrator.run().await.unwrap_err();

    let OrchestratorError::NoUsableResults { report, .. } = err else {
        panic!("expected NoUsableResults, got {err:?}");
    };
    assert!(report.cancelled);
    assert_eq!(report.primary.dispatched, 0);
    assert_eq!(report.primary.undispatched, 5);
    assert!(report.reconciliation.is_none());
    assert_eq!(h.factory.navigations(), 0);
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(8)]
#[case(20)]
#[tokio::test(start_paused = true)]
async fn pool_never_exceeds_capacity(#[case] concurrency: usize) {
    let h = harness(
        search_between("2025-02-01", "2025-02-10"),
        config(concurrency),
        ScriptedFactory::new(),
    );

    let report = h.orchestrator.run().await.unwrap();
    let capacity = concurrency.min(10);

    assert_eq!(report.record_count, 10);
    assert_eq!(report.primary.pool.capacity, capacity);
    assert!(report.primary.pool.peak_checked_out <= capacity);
    assert!(report.primary.peak_active_runners <= concurrency);
    assert_eq!(report.primary.drain.slots_returned(), capacity);
    assert_eq!(h.factory.shutdowns(), u32::try_from(capacity).unwrap());
}

#[tokio::test(start_paused = true)]
async fn every_date_lands_in_exactly_one_bucket() {
    let factory = ScriptedFactory::new()
        .script("2025-03-02", [PageBehavior::NoResults])
        .script(
            "2025-03-04",
            [PageBehavior::ExtractionFailure, PageBehavior::ExtractionFailure],
        )
        .script(
            "2025-03-05",
            [
                PageBehavior::Blocked,
                PageBehavior::Blocked,
                PageBehavior::results(77.0, "Late Air"),
            ],
        );
    let search = search_between("2025-03-01", "2025-03-06");
    let expected: BTreeSet<NaiveDate> = enumerate_dates(search.date_from, search.date_to).into_iter().collect();
    let h = harness(search, config(3), factory);

    let report = h.orchestrator.run().await.unwrap();

    let records: BTreeSet<NaiveDate> = h.sink.last().await.unwrap().iter().map(|row| row.date).collect();
    assert_eq!(records.len(), report.record_count);
    assert!(records.is_disjoint(&report.no_data_dates));
    assert!(records.is_disjoint(&report.missing_dates));
    assert!(report.no_data_dates.is_disjoint(&report.missing_dates));

    let union: BTreeSet<NaiveDate> = records
        .iter()
        .chain(&report.no_data_dates)
        .chain(&report.missing_dates)
        .copied()
        .collect();
    assert_eq!(union, expected);
    assert_eq!(report.missing_dates, BTreeSet::from([day("2025-03-04")]));
    assert!(records.contains(&day("2025-03-05")));
}
