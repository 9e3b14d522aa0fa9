use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, CancellationToken, EventEnvelope, EventStoreError, Result, Version, cancellable,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

#[derive(Default)]
struct Log {
    events: Vec<EventEnvelope>,
    last_sequence: i64,
}

impl Log {
    fn current_version(&self, aggregate_id: AggregateId) -> Version {
        self.events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial())
    }
}

/// In-memory event store.
///
/// Clones share the same log. Appends take the write lock once and perform
/// every check and insert without yielding, so a batch is either fully
/// visible or not visible at all.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all streams.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        events: Vec<EventEnvelope>,
        options: AppendOptions,
        cancel: &CancellationToken,
    ) -> Result<Version> {
        let (aggregate_id, last_version) = validate_events_for_append(&events)?;
        let first_version = events
            .first()
            .map(|e| e.version)
            .unwrap_or(Version::first());

        cancellable(cancel, async {
            let mut log = self.log.write().await;
            let current = log.current_version(aggregate_id);

            if let Some(expected) = options.expected_version
                && current != expected
            {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected,
                    actual: current,
                });
            }

            // Mirrors the (aggregate_id, version) unique constraint of the
            // durable backend for unchecked appends.
            if first_version != current.next() {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected: Version::new(first_version.as_i64() - 1),
                    actual: current,
                });
            }

            let count = events.len();
            for mut event in events {
                log.last_sequence += 1;
                event.sequence = log.last_sequence;
                log.events.push(event);
            }

            metrics::counter!("event_store_events_appended").increment(count as u64);
            tracing::debug!(%aggregate_id, version = %last_version, count, "appended events");
            Ok(last_version)
        })
        .await
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventEnvelope>> {
        cancellable(cancel, async {
            let log = self.log.read().await;
            let mut events: Vec<_> = log
                .events
                .iter()
                .filter(|e| e.aggregate_id == aggregate_id)
                .cloned()
                .collect();
            events.sort_by_key(|e| e.version);
            Ok(events)
        })
        .await
    }

    async fn get_aggregate_version(
        &self,
        aggregate_id: AggregateId,
        cancel: &CancellationToken,
    ) -> Result<Option<Version>> {
        cancellable(cancel, async {
            let log = self.log.read().await;
            Ok(log
                .events
                .iter()
                .filter(|e| e.aggregate_id == aggregate_id)
                .map(|e| e.version)
                .max())
        })
        .await
    }

    async fn stream_all_events(&self, cancel: &CancellationToken) -> Result<EventStream> {
        use futures_util::{StreamExt, stream};

        let events = cancellable(cancel, async {
            Ok::<_, EventStoreError>(self.log.read().await.events.clone())
        })
        .await?;
        let stream = stream::iter(events.into_iter().map(Ok))
            .take_until(cancel.clone().cancelled_owned());
        Ok(Box::pin(stream))
    }

    #[cfg(any(test, feature = "test-support"))]
    async fn destroy_all(&self, cancel: &CancellationToken) -> Result<()> {
        cancellable(cancel, async {
            let mut log = self.log.write().await;
            log.events.clear();
            log.last_sequence = 0;
            Ok(())
        })
        .await
    }
}
