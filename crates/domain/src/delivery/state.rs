//! Delivery state machine.

use serde::{Deserialize, Serialize};

/// Where a delivery is in its lifecycle.
///
/// ```text
/// Created ──► ContentSet ──► Attempted ──► Sent ──┬──► Delivered
///                                                 └──► FailedDelivery
/// ```
///
/// `Delivered` and `FailedDelivery` can replace each other when a later
/// confirmation arrives. Any live state can move to `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeliveryState {
    #[default]
    Created,
    ContentSet,
    Attempted,
    Sent,
    Delivered,
    FailedDelivery,
    Deleted,
}

impl DeliveryState {
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeliveryState::Deleted)
    }

    /// True once the provider has accepted the message.
    pub fn is_sent(&self) -> bool {
        matches!(
            self,
            DeliveryState::Sent | DeliveryState::Delivered | DeliveryState::FailedDelivery
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Created => "Created",
            DeliveryState::ContentSet => "ContentSet",
            DeliveryState::Attempted => "Attempted",
            DeliveryState::Sent => "Sent",
            DeliveryState::Delivered => "Delivered",
            DeliveryState::FailedDelivery => "FailedDelivery",
            DeliveryState::Deleted => "Deleted",
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
