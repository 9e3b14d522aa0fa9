//! Projection error types.

use domain::DomainError;
use event_store::{Cancelled, EventStoreError};
use thiserror::Error;

/// Errors that can occur in query stores and during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred while reading the event log.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A row or payload could not be (de)serialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The event could not be decoded into a domain event.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Projection cancelled")]
    Cancelled,
}

impl From<Cancelled> for ProjectionError {
    fn from(_: Cancelled) -> Self {
        ProjectionError::Cancelled
    }
}

impl ProjectionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ProjectionError::Cancelled
                | ProjectionError::EventStore(EventStoreError::Cancelled)
                | ProjectionError::Domain(DomainError::Cancelled)
        )
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
