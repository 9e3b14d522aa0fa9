//! Event type resolution for stream replay.

use crate::error::{DomainError, Result};

/// Turns a persisted payload back into a domain event.
pub type Decoder<E> = fn(serde_json::Value) -> serde_json::Result<E>;

/// Static table from the persisted `event_type` discriminator to a decoder.
///
/// Each aggregate declares one as a `static`; there is no runtime
/// registration.
pub struct EventRegistry<E: 'static> {
    entries: &'static [(&'static str, Decoder<E>)],
}

impl<E> EventRegistry<E> {
    pub const fn new(entries: &'static [(&'static str, Decoder<E>)]) -> Self {
        Self { entries }
    }

    /// Decodes `payload` as an event of type `event_type`.
    ///
    /// Unregistered types and payloads that do not match the event shape
    /// both fail with [`DomainError::Unexpected`].
    pub fn decode(&self, event_type: &str, payload: serde_json::Value) -> Result<E> {
        let decoder = self
            .entries
            .iter()
            .find_map(|(name, decoder)| (*name == event_type).then_some(decoder))
            .ok_or_else(|| DomainError::unexpected(format!("unknown event type {event_type}")))?;

        decoder(payload)
            .map_err(|e| DomainError::unexpected(format!("corrupt {event_type} payload: {e}")))
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.entries.iter().any(|(name, _)| *name == event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }
}

impl<E> std::fmt::Debug for EventRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.event_types()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[derive(Debug, PartialEq)]
    enum Sample {
        Number(i64),
        Text(String),
    }

    fn number(v: serde_json::Value) -> serde_json::Result<Sample> {
        serde_json::from_value(v).map(Sample::Number)
    }

    fn text(v: serde_json::Value) -> serde_json::Result<Sample> {
        serde_json::from_value(v).map(Sample::Text)
    }

    const SAMPLE_DECODERS: &[(&str, Decoder<Sample>)] = &[("Number", number), ("Text", text)];

    static SAMPLES: EventRegistry<Sample> = EventRegistry::new(SAMPLE_DECODERS);

    #[test]
    fn decodes_registered_types() {
        assert_eq!(
            SAMPLES.decode("Number", serde_json::json!(7)).unwrap(),
            Sample::Number(7)
        );
        assert_eq!(
            SAMPLES.decode("Text", serde_json::json!("hi")).unwrap(),
            Sample::Text("hi".into())
        );
    }

    #[test]
    fn unknown_type_is_unexpected() {
        let err = SAMPLES
            .decode("Vanished", serde_json::json!(null))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(err.to_string().contains("unknown event type Vanished"));
    }

    #[test]
    fn corrupt_payload_is_unexpected() {
        let err = SAMPLES
            .decode("Number", serde_json::json!("seven"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn lists_registered_types() {
        assert!(SAMPLES.is_registered("Text"));
        assert!(!SAMPLES.is_registered("text"));
        assert_eq!(SAMPLES.event_types().collect::<Vec<_>>(), ["Number", "Text"]);
    }
}
