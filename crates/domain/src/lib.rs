//! Domain layer for the delivery-tracking system.
//!
//! - [`Aggregate`] / [`AggregateRoot`]: raise, apply and replay events,
//!   with invariants checked before every commit
//! - [`EventRegistry`]: decodes persisted events by their discriminator
//! - [`EventSourcingStore`]: saves aggregates as events and loads them by replay
//! - [`delivery`]: the message delivery aggregate and its state machine

pub mod aggregate;
pub mod command_store;
pub mod delivery;
pub mod error;
pub mod registry;

pub use aggregate::{Aggregate, AggregateRoot, DomainEvent, Invariant};
pub use command_store::EventSourcingStore;
pub use delivery::{
    Attempts, Delivery, DeliveryContent, DeliveryError, DeliveryEvent, DeliveryState,
    EmailRecipient, Tags,
};
pub use error::{DomainError, ErrorKind, Result};
pub use registry::{Decoder, EventRegistry};
