//! Delivery repository: field lookups through the read model, authoritative
//! loads and saves through the command store.

use common::AggregateId;
use domain::{Delivery, ErrorKind, EventSourcingStore};
use event_store::{CancellationToken, EventEnvelope, EventStore};
use projections::{DeliveryRow, Query, QueryStore};

use crate::error::Result;

/// Finds, loads and saves [`Delivery`] aggregates.
///
/// Lookups by a non-id field run in two phases: the read model resolves the
/// field to aggregate ids, then each aggregate is loaded from its event
/// stream. The read model may lag behind the write side; a row whose stream
/// no longer exists is skipped.
pub struct DeliveryRepository<S, Q> {
    commands: EventSourcingStore<Delivery, S>,
    rows: Q,
}

impl<S, Q> Clone for DeliveryRepository<S, Q>
where
    S: Clone,
    Q: Clone,
{
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            rows: self.rows.clone(),
        }
    }
}

impl<S, Q> DeliveryRepository<S, Q>
where
    S: EventStore,
    Q: QueryStore<DeliveryRow>,
{
    pub fn new(commands: EventSourcingStore<Delivery, S>, rows: Q) -> Self {
        Self { commands, rows }
    }

    pub fn commands(&self) -> &EventSourcingStore<Delivery, S> {
        &self.commands
    }

    pub fn rows(&self) -> &Q {
        &self.rows
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn find_by_message_id(
        &self,
        message_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>> {
        self.find_one(Query::new().and_eq("messageId", message_id).limit(1), cancel)
            .await
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn find_by_receipt_id(
        &self,
        receipt_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>> {
        self.find_one(Query::new().and_eq("receiptId", receipt_id).limit(1), cancel)
            .await
    }

    /// Every delivery addressed to `address`, ordered by id.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn find_by_recipient(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Delivery>> {
        let rows = self
            .rows
            .query(Query::new().and_eq("recipient", address), cancel)
            .await?;

        let mut deliveries = Vec::with_capacity(rows.rows.len());
        for row in rows.into_rows() {
            if let Some(delivery) = self.load_if_exists(row.id, cancel).await? {
                deliveries.push(delivery);
            }
        }
        Ok(deliveries)
    }

    pub async fn load(&self, id: AggregateId, cancel: &CancellationToken) -> Result<Delivery> {
        Ok(self.commands.load(id, cancel).await?)
    }

    /// Saves uncommitted events. The read model follows asynchronously.
    pub async fn save(
        &self,
        delivery: &mut Delivery,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventEnvelope>> {
        Ok(self.commands.save(delivery, cancel).await?)
    }

    /// Deletes every event stream and read-model row.
    #[cfg(any(test, feature = "test-support"))]
    pub async fn destroy_all(&self, cancel: &CancellationToken) -> Result<()> {
        self.commands.destroy_all(cancel).await?;
        self.rows.destroy_all(cancel).await?;
        Ok(())
    }

    async fn find_one(&self, query: Query, cancel: &CancellationToken) -> Result<Option<Delivery>> {
        let rows = self.rows.query(query, cancel).await?;
        match rows.first() {
            Some(row) => self.load_if_exists(row.id, cancel).await,
            None => Ok(None),
        }
    }

    async fn load_if_exists(
        &self,
        id: AggregateId,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>> {
        match self.commands.load(id, cancel).await {
            Ok(delivery) => Ok(Some(delivery)),
            Err(e) if e.kind() == ErrorKind::EntityNotFound => {
                tracing::warn!(%id, "read model row has no event stream");
                metrics::counter!("delivery_repository_stale_rows").increment(1);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
