//! ISO-8601 helpers for timestamps that are flattened into event payloads.

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Separator used when an ordered list of timestamps is stored as one string.
pub const LIST_SEPARATOR: char = ',';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ISO-8601 timestamp: {input}")]
pub struct TimestampParseError {
    pub input: String,
}

/// Formats a timestamp as RFC 3339 with a `Z` suffix. Fractional seconds are
/// written only as far as needed, so nanosecond values round-trip.
pub fn format_utc(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_utc(input: &str) -> Result<DateTime<Utc>, TimestampParseError> {
    DateTime::parse_from_rfc3339(input.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TimestampParseError {
            input: input.to_string(),
        })
}

/// Joins timestamps into a single comma-delimited string, preserving order.
pub fn join_utc<'a>(values: impl IntoIterator<Item = &'a DateTime<Utc>>) -> String {
    values
        .into_iter()
        .map(format_utc)
        .collect::<Vec<_>>()
        .join(&LIST_SEPARATOR.to_string())
}

/// Splits a string produced by [`join_utc`]. The empty string is the empty list.
pub fn split_utc(input: &str) -> Result<Vec<DateTime<Utc>>, TimestampParseError> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }
    input.split(LIST_SEPARATOR).map(parse_utc).collect()
}
