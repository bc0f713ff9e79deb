//! Aggregate sinks
//!
//! The orchestrator hands the final, date-sorted rows to an
//! [`AggregateSink`]. [`JsonFileSink`] writes one timestamped JSON file per
//! run; [`MemorySink`] keeps the rows for inspection.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::AggregateRows;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize rows: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where a sink put the rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkReceipt {
    pub location: Option<PathBuf>,
    pub rows: usize,
}

#[async_trait]
pub trait AggregateSink: Send + Sync {
    /// Persists ordered rows. Called at most once per run.
    async fn write(&self, rows: &AggregateRows) -> Result<SinkReceipt, SinkError>;
}

/// Writes `"{route}_{YYYYmmdd_HHMMSS}.json"` into a directory
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
    route_label: String,
    pretty: bool,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>, route_label: impl Into<String>, pretty: bool) -> Self {
        Self {
            dir: dir.into(),
            route_label: route_label.into(),
            pretty,
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn file_name(&self, now: DateTime<Local>) -> String {
        format!("{}_{}.json", self.route_label, now.format("%Y%m%d_%H%M%S"))
    }
}

#[async_trait]
impl AggregateSink for JsonFileSink {
    async fn write(&self, rows: &AggregateRows) -> Result<SinkReceipt, SinkError> {
        let body = if self.pretty {
            serde_json::to_vec_pretty(rows)?
        } else {
            serde_json::to_vec(rows)?
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(|source| SinkError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.dir.join(self.file_name(Local::now()));
        tokio::fs::write(&path, body).await.map_err(|source| SinkError::Io {
            path: path.clone(),
            source,
        })?;

        info!("💾 Saved {} row(s) to {}", rows.len(), path.display());
        Ok(SinkReceipt {
            location: Some(path),
            rows: rows.len(),
        })
    }
}

/// Collects every write in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    writes: Mutex<Vec<AggregateRows>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn writes(&self) -> Vec<AggregateRows> {
        self.writes.lock().await.clone()
    }

    /// Rows of the most recent write
    pub async fn last(&self) -> Option<AggregateRows> {
        self.writes.lock().await.last().cloned()
    }
}

#[async_trait]
impl AggregateSink for MemorySink {
    async fn write(&self, rows: &AggregateRows) -> Result<SinkReceipt, SinkError> {
        self.writes.lock().await.push(rows.clone());
        Ok(SinkReceipt {
            location: None,
            rows: rows.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    use crate::domain::{DateWindow, FieldValue, Record, RecordSet};

    fn rows() -> AggregateRows {
        let window = DateWindow::starting(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(), 7).unwrap();
        let mut fields = crate::domain::ExtractedFields::new();
        fields.insert("price".into(), FieldValue::Number(321.0));
        std::iter::once(Record::new(window, fields)).collect::<RecordSet>().into_aggregate()
    }

    #[test]
    fn test_file_name_uses_route_and_timestamp() {
        let sink = JsonFileSink::new("/tmp", "JFK - LAX x SFO", false);
        let now = Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(sink.file_name(now), "JFK - LAX x SFO_20250102_030405.json");
    }

    #[tokio::test]
    async fn test_json_sink_creates_directory_and_file() {
        let temp = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(temp.path().join("out"), "JFK - LAX", true);

        let receipt = sink.write(&rows()).await.unwrap();
        let path = receipt.location.unwrap();
        assert_eq!(receipt.rows, 1);

        let written: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(written[0]["date"], "2025-03-01");
        assert_eq!(written[0]["price"], 321.0);
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_writes() {
        let sink = MemorySink::new();
        sink.write(&rows()).await.unwrap();
        assert_eq!(sink.writes().await.len(), 1);
        assert_eq!(sink.last().await.unwrap().len(), 1);
    }
}
