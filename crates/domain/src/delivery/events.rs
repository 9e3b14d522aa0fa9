//! Delivery domain events.
//!
//! Every event serializes to a flat camelCase object carrying `rootId` and
//! `occurredUtc`; the discriminator travels on the envelope.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::registry::{Decoder, EventRegistry};

use super::{Attempts, DeliveryContent, EmailRecipient, Tags};

/// Events that can occur on a delivery aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DeliveryEvent {
    Created(Created),
    ContentSet(ContentSet),
    SendingAttempted(SendingAttempted),
    SendingSucceeded(SendingSucceeded),
    SendingFailed(SendingFailed),
    DeliveryConfirmed(DeliveryConfirmed),
    DeliveryFailureConfirmed(DeliveryFailureConfirmed),
    Deleted(Deleted),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Created {
    pub root_id: AggregateId,
    pub occurred_utc: DateTime<Utc>,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSet {
    pub root_id: AggregateId,
    pub occurred_utc: DateTime<Utc>,
    #[serde(flatten)]
    pub content: DeliveryContent,
    #[serde(flatten)]
    pub recipient: EmailRecipient,
    #[serde(default)]
    pub tags: Tags,
}

/// Carries the full attempt history, not just the new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendingAttempted {
    pub root_id: AggregateId,
    pub occurred_utc: DateTime<Utc>,
    pub attempts: Attempts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendingSucceeded {
    pub root_id: AggregateId,
    pub occurred_utc: DateTime<Utc>,
    pub receipt_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendingFailed {
    pub root_id: AggregateId,
    pub occurred_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryConfirmed {
    pub root_id: AggregateId,
    pub occurred_utc: DateTime<Utc>,
    pub receipt_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailureConfirmed {
    pub root_id: AggregateId,
    pub occurred_utc: DateTime<Utc>,
    pub receipt_id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deleted {
    pub root_id: AggregateId,
    pub occurred_utc: DateTime<Utc>,
}

impl DeliveryEvent {
    fn header(&self) -> (AggregateId, DateTime<Utc>) {
        match self {
            DeliveryEvent::Created(e) => (e.root_id, e.occurred_utc),
            DeliveryEvent::ContentSet(e) => (e.root_id, e.occurred_utc),
            DeliveryEvent::SendingAttempted(e) => (e.root_id, e.occurred_utc),
            DeliveryEvent::SendingSucceeded(e) => (e.root_id, e.occurred_utc),
            DeliveryEvent::SendingFailed(e) => (e.root_id, e.occurred_utc),
            DeliveryEvent::DeliveryConfirmed(e) => (e.root_id, e.occurred_utc),
            DeliveryEvent::DeliveryFailureConfirmed(e) => (e.root_id, e.occurred_utc),
            DeliveryEvent::Deleted(e) => (e.root_id, e.occurred_utc),
        }
    }
}

impl DomainEvent for DeliveryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DeliveryEvent::Created(_) => "Created",
            DeliveryEvent::ContentSet(_) => "ContentSet",
            DeliveryEvent::SendingAttempted(_) => "SendingAttempted",
            DeliveryEvent::SendingSucceeded(_) => "SendingSucceeded",
            DeliveryEvent::SendingFailed(_) => "SendingFailed",
            DeliveryEvent::DeliveryConfirmed(_) => "DeliveryConfirmed",
            DeliveryEvent::DeliveryFailureConfirmed(_) => "DeliveryFailureConfirmed",
            DeliveryEvent::Deleted(_) => "Deleted",
        }
    }

    fn root_id(&self) -> AggregateId {
        self.header().0
    }

    fn occurred_utc(&self) -> DateTime<Utc> {
        self.header().1
    }

    fn is_creation(&self) -> bool {
        matches!(self, DeliveryEvent::Created(_))
    }
}

macro_rules! decoder {
    ($variant:ident) => {{
        fn decode(payload: serde_json::Value) -> serde_json::Result<DeliveryEvent> {
            serde_json::from_value(payload).map(DeliveryEvent::$variant)
        }
        decode as Decoder<DeliveryEvent>
    }};
}

const DECODERS: &[(&str, Decoder<DeliveryEvent>)] = &[
    ("Created", decoder!(Created)),
    ("ContentSet", decoder!(ContentSet)),
    ("SendingAttempted", decoder!(SendingAttempted)),
    ("SendingSucceeded", decoder!(SendingSucceeded)),
    ("SendingFailed", decoder!(SendingFailed)),
    ("DeliveryConfirmed", decoder!(DeliveryConfirmed)),
    ("DeliveryFailureConfirmed", decoder!(DeliveryFailureConfirmed)),
    ("Deleted", decoder!(Deleted)),
];

/// Decoders for every persisted delivery event type.
pub static DELIVERY_EVENTS: EventRegistry<DeliveryEvent> = EventRegistry::new(DECODERS);
