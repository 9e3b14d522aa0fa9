//! Service-level error type.

use domain::{DomainError, ErrorKind};
use event_store::EventStoreError;
use projections::ProjectionError;
use thiserror::Error;

/// Errors surfaced by the repository and the service binary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A command, load or save failed on the write side.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The read model could not be queried or projected.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    EventStore(#[from] EventStoreError),
}

impl ServiceError {
    /// Domain error kind, if this error came from the write side.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ServiceError::Domain(e) => Some(e.kind()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            ServiceError::Domain(e) => e.kind() == ErrorKind::Cancelled,
            ServiceError::Projection(e) => e.is_cancelled(),
            ServiceError::EventStore(e) => matches!(e, EventStoreError::Cancelled),
            ServiceError::Configuration(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
