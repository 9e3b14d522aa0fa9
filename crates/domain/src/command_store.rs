//! Event-sourcing command store: saves aggregates as events and rebuilds them
//! by replay.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendOptions, CancellationToken, EventEnvelope, EventStore, Version};
use tokio::sync::mpsc;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::{DomainError, Result};

/// Loads and saves one kind of aggregate on top of an [`EventStore`].
///
/// Optionally forwards every committed envelope to a channel so read-model
/// projections can follow the write side without polling.
pub struct EventSourcingStore<A, S> {
    store: S,
    publisher: Option<mpsc::UnboundedSender<EventEnvelope>>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, S> Clone for EventSourcingStore<A, S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            publisher: self.publisher.clone(),
            _aggregate: PhantomData,
        }
    }
}

impl<A, S> EventSourcingStore<A, S>
where
    A: Aggregate,
    S: EventStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            publisher: None,
            _aggregate: PhantomData,
        }
    }

    /// Publishes committed envelopes on `sender` after every successful save.
    pub fn with_publisher(mut self, sender: mpsc::UnboundedSender<EventEnvelope>) -> Self {
        self.publisher = Some(sender);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Appends the aggregate's uncommitted events.
    ///
    /// Invariants are checked first. The append expects the stream to still
    /// be at the version the aggregate was loaded at; on success the buffer is
    /// cleared and the version advanced, on failure the aggregate is left
    /// untouched. Returns the committed envelopes.
    #[tracing::instrument(
        skip_all,
        fields(aggregate_type = A::aggregate_type(), aggregate_id = tracing::field::Empty)
    )]
    pub async fn save(
        &self,
        aggregate: &mut A,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventEnvelope>> {
        if !aggregate.has_uncommitted_events() {
            return Ok(Vec::new());
        }

        aggregate.ensure_invariants()?;
        let aggregate_id = aggregate
            .id()
            .ok_or_else(|| DomainError::unexpected("aggregate without id passed invariants"))?;
        tracing::Span::current().record("aggregate_id", tracing::field::display(aggregate_id));

        let expected = aggregate.version();
        let envelopes = build_envelopes::<A>(aggregate_id, expected, aggregate.uncommitted_events())?;

        let new_version = self
            .store
            .append(
                envelopes.clone(),
                AppendOptions::expect_version(expected),
                cancel,
            )
            .await?;
        aggregate.root_mut().mark_committed(new_version);

        tracing::debug!(%aggregate_id, version = %new_version, count = envelopes.len(), "saved aggregate");
        self.publish(&envelopes);
        Ok(envelopes)
    }

    /// Rebuilds an aggregate by replaying its whole stream.
    #[tracing::instrument(skip(self, cancel), fields(aggregate_type = A::aggregate_type()))]
    pub async fn load(&self, aggregate_id: AggregateId, cancel: &CancellationToken) -> Result<A> {
        let envelopes = self
            .store
            .get_events_for_aggregate(aggregate_id, cancel)
            .await?;

        if envelopes.is_empty() {
            return Err(DomainError::EntityNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id: aggregate_id.to_string(),
            });
        }

        let registry = A::event_registry();
        let mut aggregate = A::default();
        for envelope in envelopes {
            let event = registry.decode(&envelope.event_type, envelope.payload)?;
            aggregate.replay(&event, envelope.version)?;
        }

        metrics::counter!("domain_aggregates_loaded").increment(1);
        Ok(aggregate)
    }

    /// Deletes every stream in the underlying store.
    #[cfg(any(test, feature = "test-support"))]
    pub async fn destroy_all(&self, cancel: &CancellationToken) -> Result<()> {
        self.store.destroy_all(cancel).await?;
        Ok(())
    }

    fn publish(&self, envelopes: &[EventEnvelope]) {
        let Some(sender) = &self.publisher else {
            return;
        };
        for envelope in envelopes {
            if sender.send(envelope.clone()).is_err() {
                tracing::warn!("event publication channel closed; projections will catch up");
                return;
            }
        }
    }
}

/// Wraps domain events in envelopes numbered on from `current_version`.
///
/// The payload is the flat event body with `eventType` added.
fn build_envelopes<A: Aggregate>(
    aggregate_id: AggregateId,
    current_version: Version,
    events: &[A::Event],
) -> Result<Vec<EventEnvelope>> {
    let mut version = current_version;
    events
        .iter()
        .map(|event| {
            version = version.next();

            let mut payload = serde_json::to_value(event)?;
            if let serde_json::Value::Object(fields) = &mut payload {
                fields.insert(
                    "eventType".to_string(),
                    serde_json::Value::from(event.event_type()),
                );
            }

            EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .timestamp(event.occurred_utc())
                .payload_raw(payload)
                .build()
                .map_err(DomainError::from)
        })
        .collect()
}
