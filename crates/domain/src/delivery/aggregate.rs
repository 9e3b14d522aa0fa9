//! Delivery aggregate implementation.

use chrono::{DateTime, Utc};
use common::AggregateId;

use crate::aggregate::{Aggregate, AggregateRoot, DomainEvent, Invariant};
use crate::error::{DomainError, Result};
use crate::registry::EventRegistry;

use super::{
    Attempts, ContentSet, Created, DELIVERY_EVENTS, Deleted, DeliveryConfirmed, DeliveryContent,
    DeliveryError, DeliveryEvent, DeliveryFailureConfirmed, DeliveryState, EmailRecipient,
    SendingAttempted, SendingFailed, SendingSucceeded, Tags,
};

/// Tracks one outbound message from content authoring through the provider's
/// delivery confirmation.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    root: AggregateRoot<DeliveryEvent>,
    state: DeliveryState,
    message_id: String,
    content: Option<DeliveryContent>,
    recipient: Option<EmailRecipient>,
    tags: Tags,
    attempts: Attempts,
    receipt_id: Option<String>,
    sent: Option<DateTime<Utc>>,
    sending_failed: Option<DateTime<Utc>>,
    delivered: Option<DateTime<Utc>>,
    failed_delivery: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
}

fn message_id_not_blank(delivery: &Delivery) -> Result<()> {
    if delivery.message_id.trim().is_empty() {
        return Err(DomainError::validation("message id is required"));
    }
    Ok(())
}

fn delivered_and_failed_exclusive(delivery: &Delivery) -> Result<()> {
    if delivery.delivered.is_some() && delivery.failed_delivery.is_some() {
        return Err(DomainError::unexpected(
            "delivery is marked both delivered and failed",
        ));
    }
    Ok(())
}

fn sent_implies_attempted(delivery: &Delivery) -> Result<()> {
    if delivery.sent.is_some() && delivery.attempts.is_empty() {
        return Err(DeliveryError::NotAttempted.into());
    }
    Ok(())
}

const INVARIANTS: &[Invariant<Delivery>] = &[
    message_id_not_blank,
    delivered_and_failed_exclusive,
    sent_implies_attempted,
];

impl Aggregate for Delivery {
    type Event = DeliveryEvent;

    fn aggregate_type() -> &'static str {
        "Delivery"
    }

    fn event_registry() -> &'static EventRegistry<DeliveryEvent> {
        &DELIVERY_EVENTS
    }

    fn root(&self) -> &AggregateRoot<DeliveryEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut AggregateRoot<DeliveryEvent> {
        &mut self.root
    }

    fn apply(&mut self, event: &DeliveryEvent, is_reconstituting: bool) -> Result<()> {
        match event {
            DeliveryEvent::Created(e) => {
                self.message_id = e.message_id.clone();
                self.state = DeliveryState::Created;
            }
            DeliveryEvent::ContentSet(e) => {
                self.content = Some(e.content.clone());
                self.recipient = Some(e.recipient.clone());
                self.tags = e.tags.clone();
                if self.state == DeliveryState::Created {
                    self.state = DeliveryState::ContentSet;
                }
            }
            DeliveryEvent::SendingAttempted(e) => {
                self.attempts = e.attempts.clone();
                if !self.state.is_sent() {
                    self.state = DeliveryState::Attempted;
                }
            }
            DeliveryEvent::SendingSucceeded(e) => {
                self.sent = Some(e.occurred_utc);
                self.receipt_id = Some(e.receipt_id.clone());
                self.delivered = None;
                self.state = DeliveryState::Sent;
            }
            DeliveryEvent::SendingFailed(e) => {
                self.sending_failed = Some(e.occurred_utc);
            }
            DeliveryEvent::DeliveryConfirmed(e) => {
                self.delivered = Some(e.occurred_utc);
                self.failed_delivery = None;
                self.failure_reason = None;
                self.state = DeliveryState::Delivered;
            }
            DeliveryEvent::DeliveryFailureConfirmed(e) => {
                self.failed_delivery = Some(e.occurred_utc);
                self.failure_reason = Some(e.reason.clone());
                self.delivered = None;
                self.state = DeliveryState::FailedDelivery;
            }
            DeliveryEvent::Deleted(_) => {
                self.state = DeliveryState::Deleted;
            }
        }

        if !is_reconstituting {
            tracing::info!(
                target: "audit",
                delivery_id = %event.root_id(),
                message_id = %self.message_id,
                event_type = event.event_type(),
                state = %self.state,
                "delivery changed"
            );
        }
        Ok(())
    }

    fn invariants() -> &'static [Invariant<Self>] {
        INVARIANTS
    }
}

// Command methods
impl Delivery {
    /// Starts tracking a new message.
    pub fn create(id: AggregateId, message_id: impl Into<String>) -> Result<Self> {
        let message_id = message_id.into();
        if message_id.trim().is_empty() {
            return Err(DomainError::validation("message id is required"));
        }

        let mut delivery = Self::default();
        delivery.raise_create(DeliveryEvent::Created(Created {
            root_id: id,
            occurred_utc: Utc::now(),
            message_id,
        }))?;
        Ok(delivery)
    }

    pub fn set_content(
        &mut self,
        content: DeliveryContent,
        recipient: EmailRecipient,
        tags: Tags,
    ) -> Result<()> {
        let id = self.live_id()?;
        if self.is_sent() {
            return Err(DeliveryError::AlreadySent.into());
        }

        self.raise_change(DeliveryEvent::ContentSet(ContentSet {
            root_id: id,
            occurred_utc: Utc::now(),
            content,
            recipient,
            tags,
        }))
    }

    /// Records a send attempt at `when`.
    ///
    /// Returns `Ok(true)` without raising anything if the message was already
    /// sent, so a retrying sender can stop.
    pub fn attempt_sending(&mut self, when: DateTime<Utc>) -> Result<bool> {
        let id = self.live_id()?;
        if self.is_sent() {
            return Ok(true);
        }
        if self.content.is_none() {
            return Err(DeliveryError::NoContent.into());
        }

        let attempts = self.attempts.attempt(when)?;
        self.raise_change(DeliveryEvent::SendingAttempted(SendingAttempted {
            root_id: id,
            occurred_utc: when,
            attempts,
        }))?;
        Ok(false)
    }

    pub fn succeeded_sending(&mut self, receipt_id: impl Into<String>, when: DateTime<Utc>) -> Result<()> {
        let id = self.ensure_can_finish_sending()?;
        let receipt_id = receipt_id.into();
        if receipt_id.trim().is_empty() {
            return Err(DomainError::validation("receipt id is required"));
        }

        self.raise_change(DeliveryEvent::SendingSucceeded(SendingSucceeded {
            root_id: id,
            occurred_utc: when,
            receipt_id,
        }))
    }

    pub fn failed_sending(&mut self, when: DateTime<Utc>) -> Result<()> {
        let id = self.ensure_can_finish_sending()?;
        self.raise_change(DeliveryEvent::SendingFailed(SendingFailed {
            root_id: id,
            occurred_utc: when,
        }))
    }

    pub fn confirm_delivery(&mut self, receipt_id: impl Into<String>, when: DateTime<Utc>) -> Result<()> {
        let id = self.ensure_can_confirm()?;
        self.raise_change(DeliveryEvent::DeliveryConfirmed(DeliveryConfirmed {
            root_id: id,
            occurred_utc: when,
            receipt_id: receipt_id.into(),
        }))
    }

    /// Records that the provider could not deliver the message.
    ///
    /// A repeated failure confirmation is accepted and ignored; the first
    /// reason is kept.
    pub fn confirm_delivery_failed(
        &mut self,
        receipt_id: impl Into<String>,
        when: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<()> {
        let id = self.ensure_can_confirm()?;
        if self.is_failed_delivery() {
            return Ok(());
        }

        self.raise_change(DeliveryEvent::DeliveryFailureConfirmed(
            DeliveryFailureConfirmed {
                root_id: id,
                occurred_utc: when,
                receipt_id: receipt_id.into(),
                reason: reason.into(),
            },
        ))
    }

    /// Marks the delivery deleted. No command is accepted afterwards.
    pub fn delete(&mut self, when: DateTime<Utc>) -> Result<()> {
        let id = self.live_id()?;
        self.raise_change(DeliveryEvent::Deleted(Deleted {
            root_id: id,
            occurred_utc: when,
        }))
    }

    fn live_id(&self) -> Result<AggregateId> {
        let id = self.id().ok_or(DeliveryError::NotCreated)?;
        if self.state.is_deleted() {
            return Err(DeliveryError::Deleted.into());
        }
        Ok(id)
    }

    fn ensure_can_finish_sending(&self) -> Result<AggregateId> {
        let id = self.live_id()?;
        if self.is_sent() {
            return Err(DeliveryError::AlreadySent.into());
        }
        if !self.is_attempted() {
            return Err(DeliveryError::NotAttempted.into());
        }
        Ok(id)
    }

    fn ensure_can_confirm(&self) -> Result<AggregateId> {
        let id = self.live_id()?;
        if !self.is_sent() {
            return Err(DeliveryError::NotSent.into());
        }
        if self.is_delivered() {
            return Err(DeliveryError::AlreadyDelivered.into());
        }
        Ok(id)
    }
}

// Query methods
impl Delivery {
    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn content(&self) -> Option<&DeliveryContent> {
        self.content.as_ref()
    }

    pub fn recipient(&self) -> Option<&EmailRecipient> {
        self.recipient.as_ref()
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn attempts(&self) -> &Attempts {
        &self.attempts
    }

    pub fn receipt_id(&self) -> Option<&str> {
        self.receipt_id.as_deref()
    }

    pub fn is_attempted(&self) -> bool {
        !self.attempts.is_empty()
    }

    pub fn is_sent(&self) -> bool {
        self.sent.is_some()
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered.is_some()
    }

    pub fn is_failed_delivery(&self) -> bool {
        self.failed_delivery.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.state.is_deleted()
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent
    }

    /// Time of the most recent failed send, if any.
    pub fn sending_failed_at(&self) -> Option<DateTime<Utc>> {
        self.sending_failed
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered
    }

    pub fn failed_delivery_at(&self) -> Option<DateTime<Utc>> {
        self.failed_delivery
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    fn with_content() -> Delivery {
        let mut delivery = Delivery::create(AggregateId::new(), "msg-1").unwrap();
        delivery
            .set_content(
                DeliveryContent::create_html("Hi", "Hello").unwrap(),
                EmailRecipient::create("bob@x.com", None).unwrap(),
                Tags::default(),
            )
            .unwrap();
        delivery
    }

    fn sent() -> Delivery {
        let mut delivery = with_content();
        delivery.attempt_sending(at(0)).unwrap();
        delivery.succeeded_sending("r-1", at(1)).unwrap();
        delivery
    }

    fn rule_code(result: Result<impl std::fmt::Debug>) -> &'static str {
        result.unwrap_err().code().unwrap_or("<none>")
    }

    #[test]
    fn create_rejects_blank_message_id() {
        let err = Delivery::create(AggregateId::new(), "  ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn create_raises_created() {
        let id = AggregateId::new();
        let delivery = Delivery::create(id, "msg-1").unwrap();

        assert_eq!(delivery.id(), Some(id));
        assert_eq!(delivery.message_id(), "msg-1");
        assert_eq!(delivery.state(), DeliveryState::Created);
        assert_eq!(delivery.uncommitted_events().len(), 1);
        assert!(delivery.uncommitted_events()[0].is_creation());
    }

    #[test]
    fn attempt_requires_content() {
        let mut delivery = Delivery::create(AggregateId::new(), "msg-1").unwrap();
        assert_eq!(rule_code(delivery.attempt_sending(at(0))), "NoContent");
    }

    #[test]
    fn earlier_attempt_is_rejected_without_event() {
        let mut delivery = with_content();
        delivery.attempt_sending(at(5)).unwrap();
        let before = delivery.uncommitted_events().len();

        let err = delivery.attempt_sending(at(4)).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(delivery.uncommitted_events().len(), before);
        assert_eq!(delivery.attempts().as_slice(), &[at(5)]);
    }

    #[test]
    fn attempt_after_sent_is_idempotent() {
        let mut delivery = sent();
        let before = delivery.uncommitted_events().len();

        assert!(delivery.attempt_sending(at(9)).unwrap());
        assert_eq!(delivery.uncommitted_events().len(), before);
    }

    #[test]
    fn sending_outcome_requires_attempt() {
        let mut delivery = with_content();
        assert_eq!(rule_code(delivery.succeeded_sending("r-1", at(1))), "NotAttempted");
        assert_eq!(rule_code(delivery.failed_sending(at(1))), "NotAttempted");
    }

    #[test]
    fn sending_outcome_rejected_once_sent() {
        let mut delivery = sent();
        assert_eq!(rule_code(delivery.succeeded_sending("r-2", at(2))), "AlreadySent");
        assert_eq!(rule_code(delivery.failed_sending(at(2))), "AlreadySent");
    }

    #[test]
    fn content_is_frozen_once_sent() {
        let mut delivery = sent();
        let result = delivery.set_content(
            DeliveryContent::create_html("New", "Body").unwrap(),
            EmailRecipient::create("eve@x.com", None).unwrap(),
            Tags::default(),
        );
        assert_eq!(rule_code(result), "AlreadySent");
        assert_eq!(delivery.content().map(DeliveryContent::subject), Some("Hi"));
    }

    #[test]
    fn failed_sending_keeps_delivery_markers() {
        let mut delivery = with_content();
        delivery.attempt_sending(at(0)).unwrap();
        delivery.failed_sending(at(1)).unwrap();

        assert_eq!(delivery.sending_failed_at(), Some(at(1)));
        assert!(!delivery.is_sent());
        assert_eq!(delivery.state(), DeliveryState::Attempted);

        delivery.attempt_sending(at(2)).unwrap();
        delivery.succeeded_sending("r-1", at(3)).unwrap();
        assert!(delivery.is_sent());
        assert_eq!(delivery.attempts().len(), 2);
    }

    #[test]
    fn confirmations_require_sent() {
        let mut delivery = with_content();
        assert_eq!(rule_code(delivery.confirm_delivery("r-1", at(2))), "NotSent");
        assert_eq!(
            rule_code(delivery.confirm_delivery_failed("r-1", at(2), "bounced")),
            "NotSent"
        );
    }

    #[test]
    fn confirmations_rejected_once_delivered() {
        let mut delivery = sent();
        delivery.confirm_delivery("r-1", at(2)).unwrap();

        assert_eq!(rule_code(delivery.confirm_delivery("r-1", at(3))), "AlreadyDelivered");
        assert_eq!(
            rule_code(delivery.confirm_delivery_failed("r-1", at(3), "bounced")),
            "AlreadyDelivered"
        );
    }

    #[test]
    fn delivery_confirmation_clears_failure() {
        let mut delivery = sent();
        delivery
            .confirm_delivery_failed("r-1", at(2), "mailbox full")
            .unwrap();
        assert!(delivery.is_failed_delivery());

        delivery.confirm_delivery("r-1", at(3)).unwrap();

        assert!(delivery.is_delivered());
        assert!(!delivery.is_failed_delivery());
        assert_eq!(delivery.failure_reason(), None);
        assert_eq!(delivery.state(), DeliveryState::Delivered);
    }

    #[test]
    fn repeated_failure_confirmation_is_a_no_op() {
        let mut delivery = sent();
        delivery
            .confirm_delivery_failed("r-1", at(2), "mailbox full")
            .unwrap();
        let before = delivery.uncommitted_events().len();

        delivery
            .confirm_delivery_failed("r-1", at(3), "unknown user")
            .unwrap();

        assert_eq!(delivery.uncommitted_events().len(), before);
        assert_eq!(delivery.failure_reason(), Some("mailbox full"));
        assert_eq!(delivery.failed_delivery_at(), Some(at(2)));
    }

    #[test]
    fn deleted_delivery_rejects_commands() {
        let mut delivery = with_content();
        delivery.delete(at(1)).unwrap();

        assert!(delivery.is_deleted());
        assert_eq!(rule_code(delivery.attempt_sending(at(2))), "Deleted");
        assert_eq!(rule_code(delivery.delete(at(3))), "Deleted");
    }

    #[test]
    fn invariants_hold_through_lifecycle() {
        let mut delivery = sent();
        assert!(delivery.ensure_invariants().is_ok());
        delivery.confirm_delivery("r-1", at(5)).unwrap();
        assert!(delivery.ensure_invariants().is_ok());
    }

    #[test]
    fn replay_matches_live_state() {
        let mut live = sent();
        live.confirm_delivery_failed("r-1", at(2), "bounced").unwrap();
        live.confirm_delivery("r-1", at(3)).unwrap();

        let replayed = Delivery::from_history(live.uncommitted_events()).unwrap();

        assert_eq!(replayed.id(), live.id());
        assert_eq!(replayed.state(), live.state());
        assert_eq!(replayed.attempts(), live.attempts());
        assert_eq!(replayed.receipt_id(), live.receipt_id());
        assert_eq!(replayed.delivered_at(), live.delivered_at());
        assert_eq!(replayed.failed_delivery_at(), None);
        assert_eq!(replayed.content(), live.content());
        assert_eq!(replayed.recipient(), live.recipient());
        assert_eq!(replayed.version().as_i64(), 6);
        assert!(replayed.uncommitted_events().is_empty());
    }
}
