//! Deliveries read model: one row per live delivery, keyed by aggregate id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::delivery::{DELIVERY_EVENTS, DeliveryEvent, DeliveryState};
use domain::{Aggregate, Delivery};
use event_store::{CancellationToken, EventEnvelope};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::projection::Projection;
use crate::read_model::ReadModel;
use crate::store::QueryStore;

/// Queryable summary of a delivery.
///
/// Every field is always serialized, so `null` is a valid filter value for
/// optional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRow {
    pub id: AggregateId,
    pub message_id: String,
    pub recipient: Option<String>,
    pub recipient_name: Option<String>,
    pub subject: Option<String>,
    pub content_kind: Option<String>,
    pub tags: Vec<String>,
    pub receipt_id: Option<String>,
    pub state: DeliveryState,
    pub attempt_count: usize,
    pub last_attempt: Option<DateTime<Utc>>,
    pub sent: Option<DateTime<Utc>>,
    pub delivered: Option<DateTime<Utc>>,
    pub failed_delivery: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub updated_utc: DateTime<Utc>,
}

impl DeliveryRow {
    fn created(id: AggregateId, message_id: String, at: DateTime<Utc>) -> Self {
        Self {
            id,
            message_id,
            recipient: None,
            recipient_name: None,
            subject: None,
            content_kind: None,
            tags: Vec::new(),
            receipt_id: None,
            state: DeliveryState::Created,
            attempt_count: 0,
            last_attempt: None,
            sent: None,
            delivered: None,
            failed_delivery: None,
            failure_reason: None,
            updated_utc: at,
        }
    }
}

impl ReadModel for DeliveryRow {
    const MODEL: &'static str = "deliveries";

    fn id(&self) -> AggregateId {
        self.id
    }
}

/// Projects delivery events into [`DeliveryRow`]s.
///
/// Updates write absolute values taken from the event, so redelivering an
/// event leaves the row unchanged.
pub struct DeliveryProjection<Q> {
    rows: Q,
}

impl<Q: QueryStore<DeliveryRow>> DeliveryProjection<Q> {
    pub fn new(rows: Q) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &Q {
        &self.rows
    }

    /// Loads the row, applies `change` and writes it back.
    /// Returns false when there is no row to update.
    async fn update<F>(
        &self,
        id: AggregateId,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
        change: F,
    ) -> Result<bool>
    where
        F: FnOnce(&mut DeliveryRow) + Send,
    {
        let Some(mut row) = self.rows.get(id, cancel).await? else {
            tracing::debug!(%id, "no delivery row to update");
            return Ok(false);
        };
        change(&mut row);
        row.updated_utc = at;
        self.rows.upsert(row, cancel).await?;
        Ok(true)
    }
}

#[async_trait]
impl<Q: QueryStore<DeliveryRow>> Projection for DeliveryProjection<Q> {
    fn name(&self) -> &'static str {
        DeliveryRow::MODEL
    }

    #[tracing::instrument(
        skip_all,
        fields(event_type = %event.event_type, aggregate_id = %event.aggregate_id)
    )]
    async fn project(&self, event: &EventEnvelope, cancel: &CancellationToken) -> Result<bool> {
        if event.aggregate_type != Delivery::aggregate_type() {
            return Ok(false);
        }

        let id = event.aggregate_id;
        match DELIVERY_EVENTS.decode(&event.event_type, event.payload.clone())? {
            DeliveryEvent::Created(e) => {
                if self.rows.get(id, cancel).await?.is_none() {
                    let row = DeliveryRow::created(id, e.message_id, e.occurred_utc);
                    self.rows.upsert(row, cancel).await?;
                }
                Ok(true)
            }
            DeliveryEvent::ContentSet(e) => {
                self.update(id, e.occurred_utc, cancel, |row| {
                    row.recipient = Some(e.recipient.address().to_string());
                    row.recipient_name = e.recipient.display_name().map(str::to_string);
                    row.subject = Some(e.content.subject().to_string());
                    row.content_kind = Some(e.content.kind().to_string());
                    row.tags = e.tags.iter().map(str::to_string).collect();
                    if row.state == DeliveryState::Created {
                        row.state = DeliveryState::ContentSet;
                    }
                })
                .await
            }
            DeliveryEvent::SendingAttempted(e) => {
                self.update(id, e.occurred_utc, cancel, |row| {
                    row.attempt_count = e.attempts.len();
                    row.last_attempt = e.attempts.latest();
                    if !row.state.is_sent() {
                        row.state = DeliveryState::Attempted;
                    }
                })
                .await
            }
            DeliveryEvent::SendingSucceeded(e) => {
                self.update(id, e.occurred_utc, cancel, |row| {
                    row.receipt_id = Some(e.receipt_id);
                    row.sent = Some(e.occurred_utc);
                    row.state = DeliveryState::Sent;
                })
                .await
            }
            // A failed send changes nothing a query can see.
            DeliveryEvent::SendingFailed(_) => Ok(false),
            DeliveryEvent::DeliveryConfirmed(e) => {
                self.update(id, e.occurred_utc, cancel, |row| {
                    row.receipt_id = Some(e.receipt_id);
                    row.delivered = Some(e.occurred_utc);
                    row.failed_delivery = None;
                    row.failure_reason = None;
                    row.state = DeliveryState::Delivered;
                })
                .await
            }
            DeliveryEvent::DeliveryFailureConfirmed(e) => {
                self.update(id, e.occurred_utc, cancel, |row| {
                    row.receipt_id = Some(e.receipt_id);
                    row.failed_delivery = Some(e.occurred_utc);
                    row.failure_reason = Some(e.reason);
                    row.delivered = None;
                    row.state = DeliveryState::FailedDelivery;
                })
                .await
            }
            DeliveryEvent::Deleted(_) => {
                self.rows.delete(id, cancel).await?;
                Ok(true)
            }
        }
    }

    async fn reset(&self, cancel: &CancellationToken) -> Result<()> {
        self.rows.clear(cancel).await
    }
}
