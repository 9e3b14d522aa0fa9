//! Delivery tracking service.
//!
//! Wires the event-sourced [`Delivery`](domain::Delivery) write side to the
//! `deliveries` read model:
//! - [`DeliveryRepository`]: two-phase lookups, loads and saves
//! - [`DeliveryService`]: stores, projection catch-up and the live projector
//! - [`config::Config`]: environment configuration for the binary

pub mod config;
pub mod error;
pub mod repository;
pub mod telemetry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use domain::EventSourcingStore;
use event_store::{CancellationToken, EventEnvelope, EventStore, InMemoryEventStore, PostgresEventStore};
use projections::{
    DeliveryProjection, DeliveryRow, InMemoryQueryStore, PostgresQueryStore, ProjectionProcessor,
    QueryStore,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub use config::{Config, LogFormat, StoreBackend};
pub use error::{Result, ServiceError};
pub use repository::DeliveryRepository;

/// How long shutdown waits for the live projector to drain queued events.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The repository plus the projector that keeps its read model current.
pub struct DeliveryService<S: EventStore, Q> {
    repository: DeliveryRepository<S, Q>,
    processor: Arc<ProjectionProcessor<S>>,
    feed: Option<mpsc::UnboundedReceiver<EventEnvelope>>,
}

impl<S, Q> DeliveryService<S, Q>
where
    S: EventStore + Clone + 'static,
    Q: QueryStore<DeliveryRow> + Clone + 'static,
{
    /// Saves through the repository are published to the live projector.
    pub fn new(events: S, rows: Q) -> Self {
        let (sender, feed) = mpsc::unbounded_channel();
        let commands = EventSourcingStore::new(events.clone()).with_publisher(sender);

        let mut processor = ProjectionProcessor::new(events);
        processor.register(Box::new(DeliveryProjection::new(rows.clone())));

        Self {
            repository: DeliveryRepository::new(commands, rows),
            processor: Arc::new(processor),
            feed: Some(feed),
        }
    }

    pub fn repository(&self) -> &DeliveryRepository<S, Q> {
        &self.repository
    }

    pub fn processor(&self) -> &Arc<ProjectionProcessor<S>> {
        &self.processor
    }

    /// Catches the read model up with the event log, then spawns the live
    /// projector. Events saved meanwhile wait in the feed.
    ///
    /// Returns `None` if the projector was already started.
    #[tracing::instrument(skip_all)]
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<Option<JoinHandle<()>>> {
        let Some(feed) = self.feed.take() else {
            return Ok(None);
        };

        let delivered = self.processor.run_catch_up(cancel).await?;
        tracing::info!(delivered, "read model caught up");

        let processor = Arc::clone(&self.processor);
        let cancel = cancel.clone();
        Ok(Some(tokio::spawn(async move {
            processor.run(feed, &cancel).await;
        })))
    }

    /// Re-runs catch-up every `every` until `cancel` fires, so events saved
    /// by other processes reach the read model.
    pub fn spawn_catch_up(&self, every: Duration, cancel: &CancellationToken) -> JoinHandle<()> {
        let processor = Arc::clone(&self.processor);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match processor.run_catch_up(&cancel).await {
                    Ok(0) => {}
                    Ok(delivered) => tracing::info!(delivered, "caught up with the event log"),
                    Err(e) if e.is_cancelled() => break,
                    Err(e) => tracing::warn!(error = %e, "periodic catch-up failed"),
                }
            }
        })
    }
}

/// Runs the service on the configured backend until `shutdown` resolves.
pub async fn run(config: &Config, shutdown: impl Future<Output = ()>) -> Result<()> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory stores");
            let service = DeliveryService::new(InMemoryEventStore::new(), InMemoryQueryStore::new());
            serve(service, config.catch_up_interval, shutdown).await
        }
        StoreBackend::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                ServiceError::Configuration("DATABASE_URL is not set".to_string())
            })?;
            let events = PostgresEventStore::connect(url, config.database_max_connections).await?;
            events.run_migrations().await?;
            tracing::info!(
                max_connections = config.database_max_connections,
                "connected to PostgreSQL"
            );

            let rows = PostgresQueryStore::new(events.pool().clone());
            serve(DeliveryService::new(events, rows), config.catch_up_interval, shutdown).await
        }
    }
}

async fn serve<S, Q>(
    mut service: DeliveryService<S, Q>,
    catch_up_interval: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<()>
where
    S: EventStore + Clone + 'static,
    Q: QueryStore<DeliveryRow> + Clone + 'static,
{
    let cancel = CancellationToken::new();
    let Some(mut live) = service.start(&cancel).await? else {
        return Ok(());
    };
    let polling = cancel.child_token();
    let poller = service.spawn_catch_up(catch_up_interval, &polling);

    shutdown.await;

    polling.cancel();
    if let Err(e) = poller.await {
        tracing::error!(error = %e, "catch-up task failed");
    }

    // Dropping the repository closes the feed; the projector exits once the
    // queued events are projected.
    drop(service);
    let joined = match tokio::time::timeout(DRAIN_TIMEOUT, &mut live).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!("live projector did not drain in time, cancelling");
            cancel.cancel();
            live.await
        }
    };
    cancel.cancel();

    if let Err(e) = joined {
        tracing::error!(error = %e, "live projector task failed");
    }
    tracing::info!("delivery service stopped");
    Ok(())
}
