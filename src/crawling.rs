//! # Crawling Module
//!
//! Concurrent day-by-day fetch engine. Leaves first:
//! - [`session`]: one remote interaction handle with an explicit state
//! - [`pool`]: bounded session container with leases
//! - [`throttle`]: cap on concurrently running task runners
//! - [`runner`]: executes one [`DateTask`] to exactly one [`Outcome`]
//! - [`orchestrator`]: primary pass, reconciliation, merge and aggregation
//! - [`sink`]: where the final rows go
//!
//! 명시적 모듈 구조 (mod.rs 비사용)

pub mod orchestrator;
pub mod pool;
pub mod queues;
pub mod runner;
pub mod session;
pub mod sink;
pub mod state;
pub mod tasks;
pub mod throttle;

#[cfg(test)]
mod scenario_tests;

pub use orchestrator::{
    FareOrchestrator, OrchestratorConfig, OrchestratorError, PassKind, PassSummary, RunReport, RunStatus,
};
pub use pool::{DrainReport, PoolError, PoolStats, SessionLease, SessionPool};
pub use queues::{ReportSender, ResultChannel};
pub use runner::TaskRunner;
pub use session::{
    BlockingIndicator, ExtractionError, InteractionStep, Session, SessionDriver, SessionError, SessionFactory,
    SessionPolicy, SessionState,
};
pub use sink::{AggregateSink, JsonFileSink, MemorySink, SinkError, SinkReceipt};
pub use state::NoDataSet;
pub use tasks::{DateTask, Outcome, OutcomeKind, TaskReport};
pub use throttle::{SpawnThrottle, ThrottleError, ThrottlePermit};
