//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

/// Coarse classification of a [`DomainError`], used by callers that map
/// failures onto transport status codes or retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    RuleViolation,
    EntityNotFound,
    Concurrency,
    Unexpected,
    Cancelled,
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Input failed business validation (blank field, non-monotonic attempt).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The command is not allowed in the aggregate's current state.
    #[error("Rule violation ({code}): {message}")]
    RuleViolation { code: &'static str, message: String },

    /// No event stream exists for the requested aggregate.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    EntityNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    /// The stream was modified after the aggregate was loaded.
    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    /// Corrupt or unknown persisted data, or an infrastructure failure.
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_) => ErrorKind::Validation,
            DomainError::RuleViolation { .. } => ErrorKind::RuleViolation,
            DomainError::EntityNotFound { .. } => ErrorKind::EntityNotFound,
            DomainError::Concurrency(_) => ErrorKind::Concurrency,
            DomainError::Unexpected(_) => ErrorKind::Unexpected,
            DomainError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DomainError::Validation(message.into())
    }

    pub fn rule(code: &'static str, message: impl Into<String>) -> Self {
        DomainError::RuleViolation {
            code,
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        DomainError::Unexpected(message.into())
    }

    /// Rule-violation code, if this is a rule violation.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            DomainError::RuleViolation { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<EventStoreError> for DomainError {
    fn from(e: EventStoreError) -> Self {
        match e {
            EventStoreError::ConcurrencyConflict { .. } => DomainError::Concurrency(e.to_string()),
            EventStoreError::Cancelled => DomainError::Cancelled,
            other => DomainError::Unexpected(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(e: serde_json::Error) -> Self {
        DomainError::Unexpected(format!("serialization failed: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{AggregateId, Version};

    #[test]
    fn store_conflict_maps_to_concurrency() {
        let err: DomainError = EventStoreError::ConcurrencyConflict {
            aggregate_id: AggregateId::new(),
            expected: Version::new(1),
            actual: Version::new(2),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Concurrency);
    }

    #[test]
    fn store_cancellation_is_preserved() {
        let err: DomainError = EventStoreError::Cancelled.into();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn other_store_failures_are_unexpected() {
        let err: DomainError = EventStoreError::InvalidAppend("empty".into()).into();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn rule_violation_exposes_code() {
        let err = DomainError::rule("AlreadySent", "delivery was already sent");
        assert_eq!(err.code(), Some("AlreadySent"));
        assert_eq!(
            err.to_string(),
            "Rule violation (AlreadySent): delivery was already sent"
        );
        assert_eq!(DomainError::validation("x").code(), None);
    }
}
