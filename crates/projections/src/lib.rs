//! Read models and projections for the CQRS query side.
//!
//! This crate provides the query side of the CQRS pattern:
//! - [`QueryStore`] for keyed, filterable read-model rows (in-memory and PostgreSQL)
//! - [`Projection`] trait for turning stored events into rows
//! - [`ProjectionProcessor`] for feeding events from the store to projections,
//!   by catch-up over the global log or from the live publication channel
//! - [`DeliveryProjection`] maintaining the `deliveries` read model

pub mod error;
pub mod processor;
pub mod projection;
pub mod query;
pub mod read_model;
pub mod store;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::{LATE_COMMIT_WINDOW, ProjectionProcessor};
pub use projection::{Projection, ProjectionPosition};
pub use query::{Query, QueryResults};
pub use read_model::ReadModel;
pub use store::{InMemoryQueryStore, PostgresQueryStore, QueryStore};
pub use views::{DeliveryProjection, DeliveryRow};
