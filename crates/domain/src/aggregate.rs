//! Core aggregate and domain event traits.
//!
//! An aggregate mutates only by raising events. Raising an event buffers it as
//! uncommitted and applies it immediately; loading replays the stored stream
//! through the same `apply` with `is_reconstituting` set, so live and replayed
//! state cannot drift apart.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::Serialize;

use crate::error::{DomainError, Result};
use crate::registry::EventRegistry;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + Debug + Clone + Send + Sync {
    /// Discriminator stored next to the payload and used to pick a decoder.
    fn event_type(&self) -> &'static str;

    /// Id of the aggregate that raised the event.
    fn root_id(&self) -> AggregateId;

    fn occurred_utc(&self) -> DateTime<Utc>;

    /// True for the event that starts a stream.
    fn is_creation(&self) -> bool;
}

/// A business rule checked before every commit.
pub type Invariant<A> = fn(&A) -> Result<()>;

/// Identity, committed version and uncommitted events of an aggregate.
#[derive(Debug, Clone)]
pub struct AggregateRoot<E> {
    id: Option<AggregateId>,
    version: Version,
    uncommitted: Vec<E>,
}

impl<E> Default for AggregateRoot<E> {
    fn default() -> Self {
        Self {
            id: None,
            version: Version::initial(),
            uncommitted: Vec::new(),
        }
    }
}

impl<E> AggregateRoot<E> {
    pub fn id(&self) -> Option<AggregateId> {
        self.id
    }

    /// Number of committed events.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn uncommitted_events(&self) -> &[E] {
        &self.uncommitted
    }

    /// Clears the buffer after a successful append that left the stream at
    /// `version`.
    pub fn mark_committed(&mut self, version: Version) {
        self.uncommitted.clear();
        self.version = version;
    }
}

/// Trait for aggregates in an event-sourced system.
///
/// Implementors own an [`AggregateRoot`] and provide `apply`, an exhaustive
/// dispatch over their event enum. Everything else is provided.
pub trait Aggregate: Default + Send + Sync + Sized + 'static {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent + 'static;

    /// Stream kind stored on every envelope, e.g. `"Delivery"`.
    fn aggregate_type() -> &'static str;

    /// Decoders for every event type this aggregate can replay.
    fn event_registry() -> &'static EventRegistry<Self::Event>;

    fn root(&self) -> &AggregateRoot<Self::Event>;

    fn root_mut(&mut self) -> &mut AggregateRoot<Self::Event>;

    /// Applies an event to the aggregate state.
    ///
    /// Audit side effects must be skipped when `is_reconstituting` is true.
    fn apply(&mut self, event: &Self::Event, is_reconstituting: bool) -> Result<()>;

    /// Aggregate-specific rules, evaluated in order after the base checks.
    fn invariants() -> &'static [Invariant<Self>] {
        &[]
    }

    fn id(&self) -> Option<AggregateId> {
        self.root().id()
    }

    fn version(&self) -> Version {
        self.root().version()
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        self.root().uncommitted_events()
    }

    fn has_uncommitted_events(&self) -> bool {
        !self.root().uncommitted.is_empty()
    }

    /// Raises the event that creates the aggregate.
    fn raise_create(&mut self, event: Self::Event) -> Result<()> {
        if self.id().is_some() || !event.is_creation() {
            return Err(DomainError::rule(
                "AlreadyCreated",
                format!("{} already exists", Self::aggregate_type()),
            ));
        }

        self.root_mut().id = Some(event.root_id());
        if let Err(e) = self.apply(&event, false) {
            self.root_mut().id = None;
            return Err(e);
        }
        self.root_mut().uncommitted.push(event);
        Ok(())
    }

    /// Raises an event against an existing aggregate.
    fn raise_change(&mut self, event: Self::Event) -> Result<()> {
        if self.id().is_none() {
            return Err(DomainError::rule(
                "NotCreated",
                format!("{} has not been created", Self::aggregate_type()),
            ));
        }
        if event.is_creation() {
            return Err(DomainError::rule(
                "AlreadyCreated",
                format!("{} already exists", Self::aggregate_type()),
            ));
        }

        self.apply(&event, false)?;
        self.root_mut().uncommitted.push(event);
        Ok(())
    }

    /// Applies one stored event during a load.
    fn replay(&mut self, event: &Self::Event, version: Version) -> Result<()> {
        match self.id() {
            None if event.is_creation() => self.root_mut().id = Some(event.root_id()),
            None => {
                return Err(DomainError::unexpected(format!(
                    "stream starts with {} instead of a creation event",
                    event.event_type()
                )));
            }
            Some(_) => {}
        }

        self.apply(event, true)?;
        self.root_mut().version = version;
        Ok(())
    }

    /// Rebuilds an aggregate from its stream, oldest first.
    fn from_history<'a>(events: impl IntoIterator<Item = &'a Self::Event>) -> Result<Self>
    where
        Self::Event: 'a,
    {
        let mut aggregate = Self::default();
        let mut version = Version::initial();
        for event in events {
            version = version.next();
            aggregate.replay(event, version)?;
        }
        Ok(aggregate)
    }

    /// Base checks, then [`Aggregate::invariants`] in order. Stops at the
    /// first failure.
    fn ensure_invariants(&self) -> Result<()> {
        let Some(id) = self.id() else {
            return Err(DomainError::rule(
                "NotCreated",
                format!("{} has no id", Self::aggregate_type()),
            ));
        };

        if let Some(stray) = self
            .uncommitted_events()
            .iter()
            .find(|e| e.root_id() != id)
        {
            return Err(DomainError::unexpected(format!(
                "{} event for {} buffered on aggregate {id}",
                stray.event_type(),
                stray.root_id()
            )));
        }

        Self::invariants().iter().try_for_each(|check| check(self))
    }
}
