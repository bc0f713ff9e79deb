//! Domain module - fare search parameters, date windows and collected records
//!
//! This module contains the pure, I/O free types of the fare sweep:
//! search parameters and target URL construction, value objects shared
//! by every layer, and the record set that the aggregation step consumes.
//!
//! Modern Rust module organization:
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod entities;
pub mod search;
pub mod value_objects;

// Re-export commonly used items for convenience
pub use entities::{AggregateRow, AggregateRows, ExtractedFields, Record, RecordSet};
pub use search::{enumerate_dates, SearchParams, ValidationError, MAX_DURATION_HOURS};
pub use value_objects::{DateWindow, FieldValue, Market, SessionId};
