//! fare-sweep: concurrent day-by-day fare collection
//!
//! Fetches the cheapest round-trip fare for every departure date in a range
//! through a bounded pool of remote sessions, recovers blocked sessions,
//! retries missing dates once and writes one sorted row per date.

pub mod crawling;
pub mod domain;
pub mod infrastructure;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crawling::{FareOrchestrator, OrchestratorConfig, OrchestratorError, RunReport, RunStatus};
pub use domain::{AggregateRows, Market, SearchParams};
pub use infrastructure::AppConfig;
