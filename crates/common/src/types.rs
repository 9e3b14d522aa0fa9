use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque identifier of an aggregate stream.
///
/// Persisted and projected as its canonical hyphenated string form, so read
/// models and event payloads never depend on the UUID binary layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

/// Returned when a string is not a valid aggregate identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid aggregate id: {input}")]
pub struct AggregateIdParseError {
    pub input: String,
}

impl AggregateId {
    /// Generates a new random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses the string form produced by `Display`.
    pub fn parse(input: &str) -> Result<Self, AggregateIdParseError> {
        Uuid::parse_str(input.trim())
            .map(Self)
            .map_err(|_| AggregateIdParseError {
                input: input.to_string(),
            })
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for AggregateId {
    type Err = AggregateIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AggregateId> for Uuid {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}
