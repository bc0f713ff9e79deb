//! # Shared Run State
//!
//! Thread-safe state shared by every task runner of a run: the set of dates
//! for which the page explicitly reported "no results".

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::RwLock;

/// Concurrency-safe set of dates with an explicit no-results answer
#[derive(Debug, Clone, Default)]
pub struct NoDataSet {
    dates: Arc<RwLock<BTreeSet<NaiveDate>>>,
}

impl NoDataSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the date was not yet recorded
    pub async fn insert(&self, date: NaiveDate) -> bool {
        self.dates.write().await.insert(date)
    }

    pub async fn contains(&self, date: &NaiveDate) -> bool {
        self.dates.read().await.contains(date)
    }

    pub async fn len(&self) -> usize {
        self.dates.read().await.len()
    }

    pub async fn snapshot(&self) -> BTreeSet<NaiveDate> {
        self.dates.read().await.clone()
    }
}
