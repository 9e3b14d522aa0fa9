//! Value objects for the delivery domain.
//!
//! Each type has two ways in: `create` enforces business rules on new input,
//! `rehydrate` only parses a representation that was already accepted once
//! and persisted. Replaying old events must never fail because a rule was
//! tightened later.

use chrono::{DateTime, Utc};
use common::{TimestampParseError, join_utc, split_utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::{DomainError, Result};

const TAG_SEPARATOR: char = ',';

/// Ordered send attempts. Never decreasing; adding returns a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attempts(Vec<DateTime<Utc>>);

impl Attempts {
    pub fn create(attempts: Vec<DateTime<Utc>>) -> Result<Self> {
        if let Some(pair) = attempts.windows(2).find(|w| w[1] < w[0]) {
            return Err(DomainError::validation(format!(
                "attempt at {} is earlier than attempt at {}",
                pair[1], pair[0]
            )));
        }
        Ok(Self(attempts))
    }

    /// Parses the comma-delimited form written by `Display`.
    pub fn rehydrate(stored: &str) -> std::result::Result<Self, TimestampParseError> {
        split_utc(stored).map(Self)
    }

    /// Returns a copy with `when` appended.
    pub fn attempt(&self, when: DateTime<Utc>) -> Result<Self> {
        if let Some(latest) = self.latest()
            && when < latest
        {
            return Err(DomainError::validation(format!(
                "attempt at {when} is earlier than the latest attempt at {latest}"
            )));
        }

        let mut attempts = self.0.clone();
        attempts.push(when);
        Ok(Self(attempts))
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.0.last().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[DateTime<Utc>] {
        &self.0
    }
}

impl std::fmt::Display for Attempts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&join_utc(&self.0))
    }
}

impl Serialize for Attempts {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Attempts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let stored = String::deserialize(deserializer)?;
        Attempts::rehydrate(&stored).map_err(de::Error::custom)
    }
}

/// Free-form labels attached to a delivery, stored comma-delimited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(Vec<String>);

impl Tags {
    pub fn create<I, T>(tags: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut accepted = Vec::new();
        for tag in tags {
            let tag = tag.into().trim().to_string();
            if tag.is_empty() {
                return Err(DomainError::validation("tags cannot be blank"));
            }
            if tag.contains(TAG_SEPARATOR) {
                return Err(DomainError::validation(format!(
                    "tag {tag:?} contains the separator {TAG_SEPARATOR:?}"
                )));
            }
            accepted.push(tag);
        }
        Ok(Self(accepted))
    }

    pub fn rehydrate(stored: &str) -> Self {
        Self(
            stored
                .split(TAG_SEPARATOR)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Tags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join(&TAG_SEPARATOR.to_string()))
    }
}

impl Serialize for Tags {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Tags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| Tags::rehydrate(&s))
    }
}

/// Who a delivery is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecipient {
    #[serde(rename = "recipient")]
    address: String,

    #[serde(
        rename = "recipientName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    display_name: Option<String>,
}

impl EmailRecipient {
    pub fn create(address: impl Into<String>, display_name: Option<String>) -> Result<Self> {
        let address = address.into().trim().to_string();
        if !is_plausible_email(&address) {
            return Err(DomainError::validation(format!(
                "{address:?} is not a valid email address"
            )));
        }

        let display_name = display_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        Ok(Self {
            address,
            display_name,
        })
    }

    pub fn rehydrate(address: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            address: address.into(),
            display_name,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }
}

fn is_plausible_email(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !address.chars().any(char::is_whitespace)
        && domain
            .split('.')
            .filter(|label| !label.is_empty())
            .count()
            >= 2
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// What gets sent: either inline HTML or a reference to a stored template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "contentKind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum DeliveryContent {
    Html { subject: String, body: String },
    Template { template_id: String, summary: String },
}

impl DeliveryContent {
    pub fn create_html(subject: impl Into<String>, body: impl Into<String>) -> Result<Self> {
        Ok(DeliveryContent::Html {
            subject: required("subject", subject.into())?,
            body: required("body", body.into())?,
        })
    }

    /// `summary` may be empty; it only feeds the read model.
    pub fn create_template(template_id: impl Into<String>, summary: impl Into<String>) -> Result<Self> {
        Ok(DeliveryContent::Template {
            template_id: required("template id", template_id.into())?,
            summary: summary.into().trim().to_string(),
        })
    }

    /// Subject line, or the template summary.
    pub fn subject(&self) -> &str {
        match self {
            DeliveryContent::Html { subject, .. } => subject,
            DeliveryContent::Template { summary, .. } => summary,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryContent::Html { .. } => "html",
            DeliveryContent::Template { .. } => "template",
        }
    }
}

fn required(field: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} is required")));
    }
    Ok(value)
}
