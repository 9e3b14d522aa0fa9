//! Core projection trait and position tracking.

use async_trait::async_trait;
use event_store::{CancellationToken, EventEnvelope};

use crate::Result;

/// Where a processor stands in the global event log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    /// Highest store sequence delivered to the projections.
    pub last_sequence: i64,
    /// Number of events delivered since the last reset.
    pub events_processed: u64,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Position after delivering the event stored at `sequence`.
    pub fn advance(&self, sequence: i64) -> Self {
        Self {
            last_sequence: self.last_sequence.max(sequence),
            events_processed: self.events_processed + 1,
        }
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "position(seq={}, processed={})",
            self.last_sequence, self.events_processed
        )
    }
}

/// Turns stored events into read-model rows.
///
/// Handlers must be idempotent: the processor delivers at least once, so the
/// same event may arrive again after a restart or from the live feed.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Projects one event. Returns false if the event is not handled by this
    /// projection and no row was touched.
    async fn project(&self, event: &EventEnvelope, cancel: &CancellationToken) -> Result<bool>;

    /// Drops every row this projection owns.
    async fn reset(&self, cancel: &CancellationToken) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_starts_at_zero() {
        let pos = ProjectionPosition::zero();
        assert_eq!(pos.last_sequence, 0);
        assert_eq!(pos.events_processed, 0);
    }

    #[test]
    fn position_advances() {
        let pos = ProjectionPosition::zero().advance(3);
        assert_eq!(pos.last_sequence, 3);
        assert_eq!(pos.events_processed, 1);

        let pos = pos.advance(7);
        assert_eq!(pos.last_sequence, 7);
        assert_eq!(pos.events_processed, 2);
    }

    #[test]
    fn position_never_moves_backwards() {
        let pos = ProjectionPosition::zero().advance(9).advance(4);
        assert_eq!(pos.last_sequence, 9);
    }

    #[test]
    fn position_display() {
        let pos = ProjectionPosition {
            last_sequence: 12,
            events_processed: 42,
        };
        assert_eq!(pos.to_string(), "position(seq=12, processed=42)");
    }
}
