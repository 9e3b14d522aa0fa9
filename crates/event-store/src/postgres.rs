use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, CancellationToken, EventEnvelope, EventId, EventStoreError, Result, Version,
    cancellable,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

/// Rows fetched per round trip while streaming the global log.
const STREAM_BATCH_SIZE: i64 = 500;

const SELECT_COLUMNS: &str = "sequence, id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata";

/// PostgreSQL-backed event store.
///
/// Appends run in one transaction; the `unique_aggregate_version` constraint
/// turns a lost race between two writers into a `ConcurrencyConflict`.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the embedded schema migrations (event log and read models).
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("timestamp")?,
            sequence: row.try_get("sequence")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }

    async fn fetch_batch(pool: &PgPool, after_sequence: i64) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM events WHERE sequence > $1 ORDER BY sequence ASC LIMIT $2"
        ))
        .bind(after_sequence)
        .bind(STREAM_BATCH_SIZE)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip_all, fields(count = events.len()))]
    async fn append(
        &self,
        events: Vec<EventEnvelope>,
        options: AppendOptions,
        cancel: &CancellationToken,
    ) -> Result<Version> {
        let (aggregate_id, last_version) = validate_events_for_append(&events)?;

        // Dropping the future on cancellation drops the transaction, which
        // rolls it back.
        cancellable(cancel, async {
            let mut tx = self.pool.begin().await?;

            if let Some(expected) = options.expected_version {
                let current: Option<i64> =
                    sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                        .bind(aggregate_id.as_uuid())
                        .fetch_one(&mut *tx)
                        .await?;
                let actual = Version::new(current.unwrap_or(0));

                if actual != expected {
                    return Err(EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected,
                        actual,
                    });
                }
            }

            for event in &events {
                let metadata_json = serde_json::to_value(&event.metadata)?;

                sqlx::query(
                    r#"
                    INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(event.event_id.as_uuid())
                .bind(&event.event_type)
                .bind(event.aggregate_id.as_uuid())
                .bind(&event.aggregate_type)
                .bind(event.version.as_i64())
                .bind(event.timestamp)
                .bind(&event.payload)
                .bind(metadata_json)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if let sqlx::Error::Database(ref db_err) = e
                        && db_err.constraint() == Some("unique_aggregate_version")
                    {
                        return EventStoreError::ConcurrencyConflict {
                            aggregate_id,
                            expected: options
                                .expected_version
                                .unwrap_or(Version::new(event.version.as_i64() - 1)),
                            actual: event.version,
                        };
                    }
                    EventStoreError::Database(e)
                })?;
            }

            tx.commit().await?;

            metrics::counter!("event_store_events_appended").increment(events.len() as u64);
            tracing::debug!(%aggregate_id, version = %last_version, "appended events");
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
            let rows = sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM events WHERE aggregate_id = $1 ORDER BY version ASC"
            ))
            .bind(aggregate_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter().map(Self::row_to_event).collect()
        })
        .await
    }

    async fn get_aggregate_version(
        &self,
        aggregate_id: AggregateId,
        cancel: &CancellationToken,
    ) -> Result<Option<Version>> {
        cancellable(cancel, async {
            let version: Option<i64> =
                sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                    .bind(aggregate_id.as_uuid())
                    .fetch_one(&self.pool)
                    .await?;

            Ok(version.map(Version::new))
        })
        .await
    }

    async fn stream_all_events(&self, cancel: &CancellationToken) -> Result<EventStream> {
        if cancel.is_cancelled() {
            return Err(EventStoreError::Cancelled);
        }

        let pool = self.pool.clone();
        let batches = stream::unfold(Some(0_i64), move |cursor| {
            let pool = pool.clone();
            async move {
                let after = cursor?;
                match Self::fetch_batch(&pool, after).await {
                    Ok(batch) if batch.is_empty() => None,
                    Ok(batch) => {
                        let next = batch.last().map(|e| e.sequence);
                        Some((Ok(batch), next))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        });

        let stream = batches
            .flat_map(|batch| {
                stream::iter(match batch {
                    Ok(events) => events.into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(e) => vec![Err(e)],
                })
            })
            .take_until(cancel.clone().cancelled_owned());

        Ok(Box::pin(stream))
    }

    #[cfg(any(test, feature = "test-support"))]
    async fn destroy_all(&self, cancel: &CancellationToken) -> Result<()> {
        cancellable(cancel, async {
            sqlx::query("TRUNCATE TABLE events RESTART IDENTITY")
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }
}
