//! Delivery aggregate and related types.

mod aggregate;
mod events;
mod state;
mod value_objects;

pub use aggregate::Delivery;
pub use events::{
    ContentSet, Created, Deleted, DeliveryConfirmed, DeliveryEvent, DeliveryFailureConfirmed,
    DELIVERY_EVENTS, SendingAttempted, SendingFailed, SendingSucceeded,
};
pub use state::DeliveryState;
pub use value_objects::{Attempts, DeliveryContent, EmailRecipient, Tags};

use thiserror::Error;

use crate::error::{DomainError, ErrorKind};

/// Rule violations raised by [`Delivery`] commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Delivery has not been attempted")]
    NotAttempted,

    #[error("Delivery was already sent")]
    AlreadySent,

    #[error("Delivery has not been sent")]
    NotSent,

    #[error("Delivery was already confirmed as delivered")]
    AlreadyDelivered,

    #[error("Delivery has no content")]
    NoContent,

    #[error("Delivery has been deleted")]
    Deleted,

    #[error("Delivery has not been created")]
    NotCreated,
}

impl DeliveryError {
    pub fn code(&self) -> &'static str {
        match self {
            DeliveryError::NotAttempted => "NotAttempted",
            DeliveryError::AlreadySent => "AlreadySent",
            DeliveryError::NotSent => "NotSent",
            DeliveryError::AlreadyDelivered => "AlreadyDelivered",
            DeliveryError::NoContent => "NoContent",
            DeliveryError::Deleted => "Deleted",
            DeliveryError::NotCreated => "NotCreated",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::RuleViolation
    }
}

impl From<DeliveryError> for DomainError {
    fn from(e: DeliveryError) -> Self {
        DomainError::RuleViolation {
            code: e.code(),
            message: e.to_string(),
        }
    }
}
