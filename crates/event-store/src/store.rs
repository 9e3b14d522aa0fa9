use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, CancellationToken, EventEnvelope, EventStoreError, Result, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Version the stream must be at for the append to succeed.
    /// `None` skips the check; only tests and migrations should do that.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// No version check.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// The stream must not exist yet.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

/// A stream of stored events in global insertion order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Persistence contract for aggregate event streams.
///
/// Every operation takes a [`CancellationToken`]; a cancelled call returns
/// [`EventStoreError::Cancelled`] and leaves the stream exactly as it was.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events for one aggregate, atomically.
    ///
    /// When `options.expected_version` is set and the stream is at a
    /// different version, nothing is written and `ConcurrencyConflict` is
    /// returned. Returns the stream version after the append.
    async fn append(
        &self,
        events: Vec<EventEnvelope>,
        options: AppendOptions,
        cancel: &CancellationToken,
    ) -> Result<Version>;

    /// Returns the full stream of an aggregate, oldest first.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventEnvelope>>;

    /// Returns `None` when the aggregate has no events.
    async fn get_aggregate_version(
        &self,
        aggregate_id: AggregateId,
        cancel: &CancellationToken,
    ) -> Result<Option<Version>>;

    /// Streams every stored event ordered by `sequence`.
    ///
    /// The stream ends early if `cancel` fires; callers check the token
    /// afterwards to tell a cancelled read from the end of the log.
    async fn stream_all_events(&self, cancel: &CancellationToken) -> Result<EventStream>;

    /// Irrecoverably deletes every stream.
    #[cfg(any(test, feature = "test-support"))]
    async fn destroy_all(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Checks that a batch targets one stream with consecutive versions.
///
/// Returns the aggregate id and the version of the last event in the batch.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<(AggregateId, Version)> {
    let Some((first, rest)) = events.split_first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty event list".to_string(),
        ));
    };

    if first.version < Version::first() {
        return Err(EventStoreError::InvalidAppend(format!(
            "event versions start at 1, got {}",
            first.version
        )));
    }

    let mut expected = first.version;
    for event in rest {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(
                "all events must belong to the same aggregate".to_string(),
            ));
        }
        if event.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::InvalidAppend(
                "all events must have the same aggregate type".to_string(),
            ));
        }
        expected = expected.next();
        if event.version != expected {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {expected}, got {}",
                event.version
            )));
        }
    }

    Ok((first.aggregate_id, expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Delivery")
            .event_type("Test")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[test]
    fn rejects_empty_batch() {
        assert!(matches!(
            validate_events_for_append(&[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn rejects_mixed_aggregates() {
        let batch = vec![envelope(AggregateId::new(), 1), envelope(AggregateId::new(), 2)];
        assert!(validate_events_for_append(&batch).is_err());
    }

    #[test]
    fn rejects_version_gaps() {
        let id = AggregateId::new();
        let batch = vec![envelope(id, 1), envelope(id, 3)];
        assert!(validate_events_for_append(&batch).is_err());
    }

    #[test]
    fn rejects_version_zero() {
        let batch = vec![envelope(AggregateId::new(), 0)];
        assert!(validate_events_for_append(&batch).is_err());
    }

    #[test]
    fn returns_last_version() {
        let id = AggregateId::new();
        let batch = vec![envelope(id, 4), envelope(id, 5), envelope(id, 6)];
        let (aggregate_id, last) = validate_events_for_append(&batch).unwrap();
        assert_eq!(aggregate_id, id);
        assert_eq!(last, Version::new(6));
    }
}
