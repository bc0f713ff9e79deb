//! Errors raised while preparing HTML inspection
//!
//! Field-level extraction failures are reported as
//! [`ExtractionError`](crate::crawling::session::ExtractionError); this type
//! covers the inspector's own setup.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ParsingError {
    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl ParsingError {
    /// Create an invalid selector error
    pub fn invalid_selector(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            reason: reason.into(),
        }
    }
}
