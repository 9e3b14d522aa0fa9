//! Read model views.

pub mod deliveries;

pub use deliveries::{DeliveryProjection, DeliveryRow};
