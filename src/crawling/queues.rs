//! # Result Channel
//!
//! Unbounded multi-producer, single-consumer channel of [`TaskReport`]s.
//! Runners push as they finish; the orchestrator drains once per pass,
//! after every task has finished or been abandoned. Sends after the drain
//! fail and the report is dropped.

use tokio::sync::mpsc;
use tracing::debug;

use super::tasks::TaskReport;

#[derive(Debug)]
pub struct ResultChannel {
    sender: mpsc::UnboundedSender<TaskReport>,
    receiver: mpsc::UnboundedReceiver<TaskReport>,
}

impl Default for ResultChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultChannel {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    #[must_use]
    pub fn sender(&self) -> ReportSender {
        ReportSender {
            sender: self.sender.clone(),
        }
    }

    /// Closes the channel and collects everything sent so far
    #[must_use]
    pub fn drain(mut self) -> Vec<TaskReport> {
        self.receiver.close();
        let mut reports = Vec::new();
        while let Ok(report) = self.receiver.try_recv() {
            reports.push(report);
        }
        reports
    }
}

/// Producer half handed to each runner
#[derive(Debug, Clone)]
pub struct ReportSender {
    sender: mpsc::UnboundedSender<TaskReport>,
}

impl ReportSender {
    /// Returns `false` when the channel was already drained
    pub fn send(&self, report: TaskReport) -> bool {
        match self.sender.send(report) {
            Ok(()) => true,
            Err(rejected) => {
                debug!("Late report for {} discarded", rejected.0.task);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawling::tasks::{DateTask, Outcome};
    use chrono::NaiveDate;
    use std::time::Duration;

    fn report(day: u32) -> TaskReport {
        TaskReport {
            task: DateTask::new(NaiveDate::from_ymd_opt(2025, 7, day).unwrap(), 2),
            outcome: Outcome::NoData,
            recoveries: 0,
            elapsed: Duration::ZERO,
            session: None,
        }
    }

    #[test]
    fn test_drain_collects_and_rejects_late_reports() {
        let channel = ResultChannel::new();
        let sender = channel.sender();
        assert!(sender.send(report(1)));
        assert!(sender.send(report(2)));

        let reports = channel.drain();
        assert_eq!(reports.len(), 2);
        assert!(!sender.send(report(3)));
    }
}
