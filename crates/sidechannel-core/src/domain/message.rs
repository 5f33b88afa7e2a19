//! Advisory messages posted by the observer into a thread mailbox.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::ValidationError;

/// What kind of advice a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    Insight,
    Correction,
    Warning,
    Context,
}

impl MessageCategory {
    /// Every category, in the fixed order used for grouping and reporting.
    pub const ALL: [MessageCategory; 4] = [
        MessageCategory::Insight,
        MessageCategory::Correction,
        MessageCategory::Warning,
        MessageCategory::Context,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insight => "insight",
            Self::Correction => "correction",
            Self::Warning => "warning",
            Self::Context => "context",
        }
    }
}

impl std::fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insight" => Ok(Self::Insight),
            "correction" => Ok(Self::Correction),
            "warning" => Ok(Self::Warning),
            "context" => Ok(Self::Context),
            _ => Err(ValidationError::UnknownCategory { name: s.to_string() }),
        }
    }
}

/// SHA-256 hex digest of a message text. Used for dedup only.
pub fn fingerprint_text(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Check that a confidence value is finite and within `[0, 1]`.
pub fn validate_confidence(value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::ConfidenceOutOfRange { value })
    }
}

/// A candidate message handed to [`MessageStore::send`](crate::store::MessageStore::send).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub thread_id: String,
    pub sender_id: String,
    pub sent_at_step: u64,
    pub category: MessageCategory,
    pub text: String,
    pub confidence: f64,
    /// Explicit expiry. When absent the store applies its default TTL.
    #[serde(default)]
    pub expires_at_step: Option<u64>,
}

impl NewMessage {
    pub fn new(
        thread_id: impl Into<String>,
        sender_id: impl Into<String>,
        sent_at_step: u64,
        category: MessageCategory,
        text: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            sender_id: sender_id.into(),
            sent_at_step,
            category,
            text: text.into(),
            confidence: 1.0,
            expires_at_step: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_expires_at_step(mut self, step: u64) -> Self {
        self.expires_at_step = Some(step);
        self
    }

    /// Expire `steps` after the send step.
    pub fn with_ttl(mut self, steps: u64) -> Self {
        self.expires_at_step = Some(self.sent_at_step.saturating_add(steps));
        self
    }

    /// Reject malformed candidates before anything is stored.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.thread_id.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "thread_id" });
        }
        if self.text.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "text" });
        }
        validate_confidence(self.confidence)?;
        Ok(())
    }
}

/// A stored message.
///
/// Every field is fixed at creation except `incorporated_at_step`, which moves
/// from `None` to a concrete step exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    id: String,
    thread_id: String,
    sender_id: String,
    sent_at_step: u64,
    sent_at: DateTime<Utc>,
    category: MessageCategory,
    text: String,
    confidence: f64,
    incorporated_at_step: Option<u64>,
    expires_at_step: Option<u64>,
    fingerprint: String,
}

impl Message {
    /// Build a stored message from an already validated candidate.
    pub fn from_new(
        id: impl Into<String>,
        candidate: NewMessage,
        sent_at: DateTime<Utc>,
        default_ttl_steps: u64,
    ) -> Self {
        let expires_at_step = candidate
            .expires_at_step
            .unwrap_or_else(|| candidate.sent_at_step.saturating_add(default_ttl_steps));
        Self {
            id: id.into(),
            fingerprint: fingerprint_text(&candidate.text),
            thread_id: candidate.thread_id,
            sender_id: candidate.sender_id,
            sent_at_step: candidate.sent_at_step,
            sent_at,
            category: candidate.category,
            text: candidate.text,
            confidence: candidate.confidence,
            incorporated_at_step: None,
            expires_at_step: Some(expires_at_step),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn sent_at_step(&self) -> u64 {
        self.sent_at_step
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    pub fn category(&self) -> MessageCategory {
        self.category
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn incorporated_at_step(&self) -> Option<u64> {
        self.incorporated_at_step
    }

    pub fn expires_at_step(&self) -> Option<u64> {
        self.expires_at_step
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_pending(&self) -> bool {
        self.incorporated_at_step.is_none()
    }

    pub fn is_incorporated(&self) -> bool {
        self.incorporated_at_step.is_some()
    }

    /// True when the expiry step has been reached (`expires_at_step <= step`).
    pub fn is_expired_at(&self, step: u64) -> bool {
        self.expires_at_step.is_some_and(|exp| exp <= step)
    }

    /// Record incorporation. Returns `false` if the message was already incorporated.
    pub(crate) fn mark_incorporated(&mut self, step: u64) -> bool {
        if self.incorporated_at_step.is_some() {
            return false;
        }
        self.incorporated_at_step = Some(step);
        true
    }
}

/// A message produced by a dispatch handler, before the coordinator fills in
/// the thread, step, and sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub category: MessageCategory,
    pub text: String,
    pub confidence: f64,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub expires_at_step: Option<u64>,
}

impl Advisory {
    pub fn new(category: MessageCategory, text: impl Into<String>, confidence: f64) -> Self {
        Self {
            category,
            text: text.into(),
            confidence,
            sender_id: None,
            expires_at_step: None,
        }
    }

    pub fn from_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    pub fn with_expires_at_step(mut self, step: u64) -> Self {
        self.expires_at_step = Some(step);
        self
    }

    /// Address this advisory to a thread at a step, defaulting the sender.
    pub fn into_new_message(
        self,
        thread_id: &str,
        step: u64,
        default_sender: &str,
    ) -> NewMessage {
        NewMessage {
            thread_id: thread_id.to_string(),
            sender_id: self.sender_id.unwrap_or_else(|| default_sender.to_string()),
            sent_at_step: step,
            category: self.category,
            text: self.text,
            confidence: self.confidence,
            expires_at_step: self.expires_at_step,
        }
    }
}
