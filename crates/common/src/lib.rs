//! Shared types used across the event store, domain and read-model crates.

pub mod time;
pub mod types;

pub use time::{TimestampParseError, format_utc, join_utc, parse_utc, split_utc};
pub use types::{AggregateId, AggregateIdParseError};
