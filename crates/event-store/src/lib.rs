//! Append-only event storage for the write side.
//!
//! Streams are keyed by [`AggregateId`] and guarded by optimistic concurrency
//! on the stream [`Version`]. Two backends share the [`EventStore`] contract:
//! [`InMemoryEventStore`] for tests and single-process use, and
//! [`PostgresEventStore`] for durable storage.

pub mod cancel;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use cancel::{CancellationToken, Cancelled, cancellable};
pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore, EventStream};
