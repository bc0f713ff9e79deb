//! # Date Task Definitions
//!
//! One [`DateTask`] per departure date. Tasks are immutable: the retry pass
//! derives a fresh task with an incremented attempt counter instead of
//! mutating the primary one. Every attempt ends in exactly one [`Outcome`],
//! wrapped in a [`TaskReport`].

use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{DateWindow, Record, SessionId};

/// Fetch unit for a single departure date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateTask {
    date: NaiveDate,
    window_length: u32,
    retry_attempt: u32,
}

impl DateTask {
    /// Creates a primary-pass task
    #[must_use]
    pub const fn new(date: NaiveDate, window_length: u32) -> Self {
        Self {
            date,
            window_length,
            retry_attempt: 0,
        }
    }

    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    /// Stay length in nights
    #[must_use]
    pub const fn window_length(&self) -> u32 {
        self.window_length
    }

    #[must_use]
    pub const fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    /// `[date, date + window_length]`; `None` past the end of the calendar
    #[must_use]
    pub fn window(&self) -> Option<DateWindow> {
        DateWindow::starting(self.date, self.window_length)
    }

    /// Same date and window, one attempt later
    #[must_use]
    pub const fn for_retry(&self) -> Self {
        Self {
            date: self.date,
            window_length: self.window_length,
            retry_attempt: self.retry_attempt + 1,
        }
    }
}

impl fmt::Display for DateTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (+{}n", self.date, self.window_length)?;
        if self.retry_attempt > 0 {
            write!(f, ", retry #{}", self.retry_attempt)?;
        }
        write!(f, ")")
    }
}

/// Result of one task attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Record(Record),
    /// The page explicitly reported that nothing matches
    NoData,
    /// Still blocked after one recovery, or recovery failed
    BlockedUnresolved,
    /// Navigation or load signal did not arrive in time
    Timeout,
    ExtractionError(String),
    Fatal(String),
}

impl Outcome {
    #[must_use]
    pub const fn kind(&self) -> OutcomeKind {
        match self {
            Self::Record(_) => OutcomeKind::Record,
            Self::NoData => OutcomeKind::NoData,
            Self::BlockedUnresolved => OutcomeKind::BlockedUnresolved,
            Self::Timeout => OutcomeKind::Timeout,
            Self::ExtractionError(_) => OutcomeKind::ExtractionError,
            Self::Fatal(_) => OutcomeKind::Fatal,
        }
    }
}

/// Payload-free outcome tag, used for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Record,
    NoData,
    BlockedUnresolved,
    Timeout,
    ExtractionError,
    Fatal,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Record => "record",
            Self::NoData => "no_data",
            Self::BlockedUnresolved => "blocked_unresolved",
            Self::Timeout => "timeout",
            Self::ExtractionError => "extraction_error",
            Self::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

/// What a task runner sends back on the result channel
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: DateTask,
    pub outcome: Outcome,
    /// Blocking recoveries performed during this attempt
    pub recoveries: u32,
    pub elapsed: Duration,
    /// Session that served the final step, if one was acquired
    pub session: Option<SessionId>,
}
