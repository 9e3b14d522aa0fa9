//! Integration tests: Delivery commands → EventSourcingStore → ProjectionProcessor → deliveries view.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::AggregateId;
use domain::{
    Aggregate, Delivery, DeliveryContent, DeliveryState, EmailRecipient, EventSourcingStore, Tags,
};
use event_store::{CancellationToken, InMemoryEventStore};
use projections::{
    DeliveryProjection, DeliveryRow, InMemoryQueryStore, ProjectionProcessor, Query, QueryStore,
};
use tokio::sync::mpsc;

type Rows = InMemoryQueryStore<DeliveryRow>;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Helper to set up the command store, processor and deliveries view.
fn setup() -> (
    EventSourcingStore<Delivery, InMemoryEventStore>,
    ProjectionProcessor<InMemoryEventStore>,
    Rows,
) {
    let events = InMemoryEventStore::new();
    let commands = EventSourcingStore::new(events.clone());
    let rows = Rows::new();

    let mut processor = ProjectionProcessor::new(events);
    processor.register(Box::new(DeliveryProjection::new(rows.clone())));

    (commands, processor, rows)
}

fn draft(message_id: &str, recipient: &str) -> Delivery {
    let mut delivery = Delivery::create(AggregateId::new(), message_id).unwrap();
    delivery
        .set_content(
            DeliveryContent::create_html("Hi", "Hello").unwrap(),
            EmailRecipient::create(recipient, None).unwrap(),
            Tags::create(["welcome"]).unwrap(),
        )
        .unwrap();
    delivery
}

#[tokio::test]
async fn full_lifecycle_is_reflected_after_catch_up() {
    let (commands, processor, rows) = setup();
    let cancel = CancellationToken::new();

    let mut delivery = draft("msg-1", "bob@x.com");
    delivery.attempt_sending(t0()).unwrap();
    delivery.succeeded_sending("r-1", t0()).unwrap();
    commands.save(&mut delivery, &cancel).await.unwrap();

    let id = delivery.id().unwrap();
    let mut delivery = commands.load(id, &cancel).await.unwrap();
    delivery
        .confirm_delivery("r-1", t0() + Duration::minutes(1))
        .unwrap();
    commands.save(&mut delivery, &cancel).await.unwrap();

    let delivered = processor.run_catch_up(&cancel).await.unwrap();
    assert_eq!(delivered, 5);

    let row = rows.get(id, &cancel).await.unwrap().unwrap();
    assert_eq!(row.message_id, "msg-1");
    assert_eq!(row.subject.as_deref(), Some("Hi"));
    assert_eq!(row.recipient.as_deref(), Some("bob@x.com"));
    assert_eq!(row.receipt_id.as_deref(), Some("r-1"));
    assert_eq!(row.state, DeliveryState::Delivered);
    assert_eq!(row.delivered, Some(t0() + Duration::minutes(1)));
}

#[tokio::test]
async fn catch_up_is_incremental_and_idempotent() {
    let (commands, processor, rows) = setup();
    let cancel = CancellationToken::new();

    let mut first = draft("msg-1", "bob@x.com");
    commands.save(&mut first, &cancel).await.unwrap();
    processor.run_catch_up(&cancel).await.unwrap();
    let snapshot = rows.get(first.id().unwrap(), &cancel).await.unwrap();

    let mut second = draft("msg-2", "ann@x.com");
    commands.save(&mut second, &cancel).await.unwrap();
    assert_eq!(processor.run_catch_up(&cancel).await.unwrap(), 2);

    assert_eq!(rows.len().await, 2);
    assert_eq!(rows.get(first.id().unwrap(), &cancel).await.unwrap(), snapshot);
    assert_eq!(processor.position().await.events_processed, 4);
}

#[tokio::test]
async fn rebuild_produces_the_same_rows() {
    let (commands, processor, rows) = setup();
    let cancel = CancellationToken::new();

    for n in 0..3 {
        let mut delivery = draft(&format!("msg-{n}"), "bob@x.com");
        delivery.attempt_sending(t0()).unwrap();
        commands.save(&mut delivery, &cancel).await.unwrap();
    }
    processor.run_catch_up(&cancel).await.unwrap();
    let before = rows.query(Query::new(), &cancel).await.unwrap();

    processor.rebuild_all(&cancel).await.unwrap();
    let after = rows.query(Query::new(), &cancel).await.unwrap();

    assert_eq!(before, after);
    assert_eq!(after.total, 3);
}

#[tokio::test]
async fn deleted_delivery_leaves_the_view() {
    let (commands, processor, rows) = setup();
    let cancel = CancellationToken::new();

    let mut delivery = draft("msg-1", "bob@x.com");
    commands.save(&mut delivery, &cancel).await.unwrap();
    processor.run_catch_up(&cancel).await.unwrap();
    assert_eq!(rows.len().await, 1);

    delivery.delete(t0()).unwrap();
    commands.save(&mut delivery, &cancel).await.unwrap();
    processor.run_catch_up(&cancel).await.unwrap();

    assert!(rows.is_empty().await);
}

#[tokio::test]
async fn live_feed_projects_published_events() {
    let events = InMemoryEventStore::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let commands: EventSourcingStore<Delivery, _> =
        EventSourcingStore::new(events.clone()).with_publisher(tx);
    let rows = Rows::new();

    let mut processor = ProjectionProcessor::new(events);
    processor.register(Box::new(DeliveryProjection::new(rows.clone())));
    let processor = Arc::new(processor);
    let cancel = CancellationToken::new();

    let live = {
        let processor = Arc::clone(&processor);
        let cancel = cancel.clone();
        tokio::spawn(async move { processor.run(rx, &cancel).await })
    };

    let mut delivery = draft("msg-1", "bob@x.com");
    delivery.attempt_sending(t0()).unwrap();
    commands.save(&mut delivery, &cancel).await.unwrap();

    // Closing the only sender ends the live loop once the queue is drained.
    drop(commands);
    live.await.unwrap();

    let row = rows.get(delivery.id().unwrap(), &cancel).await.unwrap().unwrap();
    assert_eq!(row.state, DeliveryState::Attempted);
    assert_eq!(row.attempt_count, 1);

    // Catch-up after the live feed redelivers the same events without changing the row.
    processor.run_catch_up(&cancel).await.unwrap();
    assert_eq!(rows.get(delivery.id().unwrap(), &cancel).await.unwrap(), Some(row));
}

#[tokio::test]
async fn query_by_recipient_with_paging() {
    let (commands, processor, rows) = setup();
    let cancel = CancellationToken::new();

    for n in 0..5 {
        let recipient = if n % 2 == 0 { "bob@x.com" } else { "ann@x.com" };
        let mut delivery = draft(&format!("msg-{n}"), recipient);
        commands.save(&mut delivery, &cancel).await.unwrap();
    }
    processor.run_catch_up(&cancel).await.unwrap();

    let page = rows
        .query(
            Query::new().and_eq("recipient", "bob@x.com").offset(1).limit(1),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(page.total, 3);
    assert_eq!(page.rows.len(), 1);
    assert_eq!(page.rows[0].recipient.as_deref(), Some("bob@x.com"));
}
