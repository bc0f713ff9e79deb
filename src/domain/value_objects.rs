//! # Domain Value Objects
//!
//! Immutable value types that represent concepts in the fare domain.
//! Value objects are defined by their attributes rather than identity.

use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session identifier with strong typing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// 로그용 짧은 표기 (앞 8자리)
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round-trip travel window `[depart, return_date]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateWindow {
    pub depart: NaiveDate,
    pub return_date: NaiveDate,
}

impl DateWindow {
    /// Builds the window starting at `depart` and spanning `nights` nights.
    ///
    /// Returns `None` when the return date overflows the calendar.
    #[must_use]
    pub fn starting(depart: NaiveDate, nights: u32) -> Option<Self> {
        let return_date = depart.checked_add_days(Days::new(u64::from(nights)))?;
        Some(Self { depart, return_date })
    }

    #[must_use]
    pub fn nights(&self) -> i64 {
        (self.return_date - self.depart).num_days()
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.depart, self.return_date)
    }
}

/// Regional storefront the fares are collected from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    #[default]
    Usa,
    Canada,
}

impl Market {
    /// Base URL of the flight search pages for this market
    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Usa => "https://www.kayak.com/flights",
            Self::Canada => "https://www.ca.kayak.com/flights",
        }
    }

    /// Removes currency decoration from a displayed price.
    ///
    /// `"$1,234"` becomes `"1234"`; the Canadian storefront additionally
    /// prefixes prices with `"C "`.
    #[must_use]
    pub fn strip_currency(self, raw: &str) -> String {
        let cleaned = raw.trim().replace(['$', ','], "");
        let cleaned = match self {
            Self::Usa => cleaned,
            Self::Canada => cleaned.replace("C ", ""),
        };
        cleaned.trim().to_string()
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usa => write!(f, "usa"),
            Self::Canada => write!(f, "canada"),
        }
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usa" | "us" => Ok(Self::Usa),
            "canada" | "ca" => Ok(Self::Canada),
            other => Err(format!("unknown market '{other}' (expected usa or canada)")),
        }
    }
}

/// A single extracted field value: free text or a number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Number(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}
