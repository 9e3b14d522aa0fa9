//! Projection processor for feeding events to projections.

use std::collections::BTreeSet;

use event_store::{CancellationToken, EventEnvelope, EventStore};
use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc};

use crate::projection::{Projection, ProjectionPosition};
use crate::{ProjectionError, Result};

/// How far behind the highest delivered sequence catch-up still looks for
/// events it has not delivered. Sequences are assigned before commit, so a
/// slow transaction can become visible after a later sequence was delivered.
pub const LATE_COMMIT_WINDOW: i64 = 1_000;

/// Position plus the sequences delivered inside the late-commit window.
#[derive(Debug, Default)]
struct Cursor {
    position: ProjectionPosition,
    recent: BTreeSet<i64>,
}

impl Cursor {
    fn floor(&self) -> i64 {
        self.position.last_sequence - LATE_COMMIT_WINDOW
    }

    fn has_seen(&self, sequence: i64) -> bool {
        sequence <= self.floor() || self.recent.contains(&sequence)
    }

    fn advance(&mut self, sequence: i64) {
        self.position = self.position.advance(sequence);
        self.recent.insert(sequence);
        let floor = self.floor();
        self.recent = self.recent.split_off(&(floor + 1));
    }
}

/// Delivers stored events to the registered projections.
///
/// The processor supports:
/// - Catch-up: replays the global log past its position
/// - Single event delivery: used for the live feed published by saves
/// - Rebuild: resets all projections and replays from scratch
///
/// Delivery is at least once. The position only moves during catch-up, so an
/// event seen on the live feed is projected again by the next catch-up.
/// Catch-up delivers events that commit out of sequence order as long as they
/// land within [`LATE_COMMIT_WINDOW`] of the position.
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Box<dyn Projection>>,
    cursor: Mutex<Cursor>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
            cursor: Mutex::new(Cursor::default()),
        }
    }

    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    pub async fn position(&self) -> ProjectionPosition {
        self.cursor.lock().await.position
    }

    /// Streams the event log and delivers every event past the current
    /// position. Returns the number of events delivered.
    #[tracing::instrument(skip_all)]
    pub async fn run_catch_up(&self, cancel: &CancellationToken) -> Result<u64> {
        let mut cursor = self.cursor.lock().await;
        let mut stream = self.store.stream_all_events(cancel).await?;
        let mut delivered: u64 = 0;

        while let Some(result) = stream.next().await {
            let event = result?;
            if cursor.has_seen(event.sequence) {
                continue;
            }

            self.deliver(&event, cancel).await?;
            cursor.advance(event.sequence);
            delivered += 1;
        }

        // A cancelled stream ends early instead of failing.
        if cancel.is_cancelled() {
            return Err(ProjectionError::Cancelled);
        }

        tracing::debug!(delivered, position = %cursor.position, "catch-up complete");
        Ok(delivered)
    }

    /// Delivers a single event to all registered projections.
    ///
    /// Returns true if at least one projection handled it. Stored events the
    /// processor has already caught up past are skipped.
    #[tracing::instrument(
        skip_all,
        fields(event_type = %event.event_type, aggregate_id = %event.aggregate_id)
    )]
    pub async fn process_event(
        &self,
        event: &EventEnvelope,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if event.is_stored() && self.cursor.lock().await.has_seen(event.sequence) {
            return Ok(false);
        }
        self.deliver(event, cancel).await
    }

    /// Resets all projections and the position, then replays the whole log.
    #[tracing::instrument(skip_all)]
    pub async fn rebuild_all(&self, cancel: &CancellationToken) -> Result<u64> {
        for projection in &self.projections {
            projection.reset(cancel).await?;
        }
        *self.cursor.lock().await = Cursor::default();
        self.run_catch_up(cancel).await
    }

    /// Projects events from the live feed until the channel closes or
    /// `cancel` fires.
    ///
    /// A failed event is logged and skipped; the next catch-up delivers it
    /// again.
    pub async fn run(
        &self,
        mut receiver: mpsc::UnboundedReceiver<EventEnvelope>,
        cancel: &CancellationToken,
    ) {
        tracing::info!(projections = self.projections.len(), "live projection started");

        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = receiver.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match self.process_event(&event, cancel).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => tracing::warn!(
                    error = %e,
                    event_type = %event.event_type,
                    aggregate_id = %event.aggregate_id,
                    "failed to project event"
                ),
            }
        }

        tracing::info!("live projection stopped");
    }

    async fn deliver(&self, event: &EventEnvelope, cancel: &CancellationToken) -> Result<bool> {
        let mut handled = false;
        for projection in &self.projections {
            if projection.project(event, cancel).await? {
                metrics::counter!("projections_events_processed", "projection" => projection.name())
                    .increment(1);
                handled = true;
            }
        }
        Ok(handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::AggregateId;
    use event_store::{AppendOptions, InMemoryEventStore, Version};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Counts the events it is given; handles everything except "Ignored".
    struct CountingProjection {
        count: Arc<AtomicU64>,
    }

    impl CountingProjection {
        fn new() -> (Self, Arc<AtomicU64>) {
            let count = Arc::new(AtomicU64::new(0));
            (
                Self {
                    count: Arc::clone(&count),
                },
                count,
            )
        }
    }

    #[async_trait]
    impl Projection for CountingProjection {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn project(&self, event: &EventEnvelope, _cancel: &CancellationToken) -> Result<bool> {
            if event.event_type == "Ignored" {
                return Ok(false);
            }
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn reset(&self, _cancel: &CancellationToken) -> Result<()> {
            self.count.store(0, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_event(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Delivery")
            .event_type(event_type)
            .version(Version::new(version))
            .payload_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    async fn store_with(count: i64) -> InMemoryEventStore {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let events = (1..=count).map(|v| test_event(id, v, "Test")).collect();
        store
            .append(events, AppendOptions::new(), &CancellationToken::new())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn catch_up_processes_all_events() {
        let (projection, count) = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(store_with(3).await);
        processor.register(Box::new(projection));

        let delivered = processor
            .run_catch_up(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(delivered, 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(processor.position().await.last_sequence, 3);
    }

    #[tokio::test]
    async fn catch_up_skips_already_processed() {
        let cancel = CancellationToken::new();
        let store = store_with(3).await;
        let (projection, count) = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(store.clone());
        processor.register(Box::new(projection));

        processor.run_catch_up(&cancel).await.unwrap();
        assert_eq!(processor.run_catch_up(&cancel).await.unwrap(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 3);

        let other = AggregateId::new();
        store
            .append(vec![test_event(other, 1, "Test")], AppendOptions::new(), &cancel)
            .await
            .unwrap();

        assert_eq!(processor.run_catch_up(&cancel).await.unwrap(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn empty_store_catch_up() {
        let (projection, count) = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(InMemoryEventStore::new());
        processor.register(Box::new(projection));

        processor
            .run_catch_up(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(processor.position().await, ProjectionPosition::zero());
    }

    #[tokio::test]
    async fn rebuild_resets_and_replays() {
        let cancel = CancellationToken::new();
        let (projection, count) = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(store_with(2).await);
        processor.register(Box::new(projection));

        processor.run_catch_up(&cancel).await.unwrap();
        processor.rebuild_all(&cancel).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(processor.position().await.events_processed, 2);
    }

    #[tokio::test]
    async fn multiple_projections() {
        let (first, count1) = CountingProjection::new();
        let (second, count2) = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(store_with(2).await);
        processor.register(Box::new(first));
        processor.register(Box::new(second));

        processor
            .run_catch_up(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(processor.projection_count(), 2);
        assert_eq!(count1.load(Ordering::SeqCst), 2);
        assert_eq!(count2.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn process_event_reports_whether_handled() {
        let cancel = CancellationToken::new();
        let (projection, count) = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(InMemoryEventStore::new());
        processor.register(Box::new(projection));
        let id = AggregateId::new();

        assert!(processor
            .process_event(&test_event(id, 1, "Test"), &cancel)
            .await
            .unwrap());
        assert!(!processor
            .process_event(&test_event(id, 2, "Ignored"), &cancel)
            .await
            .unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_catch_up_fails() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (projection, count) = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(store_with(2).await);
        processor.register(Box::new(projection));

        let err = processor.run_catch_up(&cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(processor.position().await, ProjectionPosition::zero());
    }

    #[test]
    fn cursor_delivers_sequences_that_commit_late() {
        let mut cursor = Cursor::default();
        for sequence in [1, 2, 4, 5] {
            assert!(!cursor.has_seen(sequence));
            cursor.advance(sequence);
        }

        assert!(cursor.has_seen(4));
        assert!(!cursor.has_seen(3));
        cursor.advance(3);
        assert!(cursor.has_seen(3));
        assert_eq!(cursor.position.last_sequence, 5);
        assert_eq!(cursor.position.events_processed, 5);
    }

    #[test]
    fn cursor_forgets_sequences_behind_the_window() {
        let mut cursor = Cursor::default();
        cursor.advance(1);
        cursor.advance(LATE_COMMIT_WINDOW + 10);

        assert!(cursor.has_seen(5));
        assert!(!cursor.has_seen(LATE_COMMIT_WINDOW + 9));
        assert_eq!(cursor.recent.len(), 1);
    }

    #[tokio::test]
    async fn run_drains_channel_until_closed() {
        let (projection, count) = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(InMemoryEventStore::new());
        processor.register(Box::new(projection));
        let (tx, rx) = mpsc::unbounded_channel();
        let id = AggregateId::new();

        tx.send(test_event(id, 1, "Test")).unwrap();
        tx.send(test_event(id, 2, "Test")).unwrap();
        drop(tx);

        processor.run(rx, &CancellationToken::new()).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let processor = Arc::new(ProjectionProcessor::new(InMemoryEventStore::new()));
        let (_tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = {
            let processor = Arc::clone(&processor);
            let cancel = cancel.clone();
            tokio::spawn(async move { processor.run(rx, &cancel).await })
        };
        cancel.cancel();

        handle.await.unwrap();
    }
}
