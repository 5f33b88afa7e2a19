//! Read-side filtering and ordering for mailbox queries.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::domain::message::{Message, MessageCategory};

/// Which lifecycle state a query selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    Pending,
    Incorporated,
    #[default]
    All,
}

impl StatusFilter {
    fn admits(&self, message: &Message) -> bool {
        match self {
            StatusFilter::Pending => message.is_pending(),
            StatusFilter::Incorporated => message.is_incorporated(),
            StatusFilter::All => true,
        }
    }
}

/// Query parameters. Every filter is optional and they are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageQuery {
    pub status: StatusFilter,
    pub min_confidence: Option<f64>,
    pub categories: Option<Vec<MessageCategory>>,
    /// Only messages sent strictly after this step.
    pub sent_after_step: Option<u64>,
    /// Reference step: messages with `expires_at_step <= as_of_step` are
    /// hidden even if `gc` has not collected them yet.
    pub as_of_step: Option<u64>,
    pub limit: Option<usize>,
}

impl MessageQuery {
    /// Query that matches all messages.
    pub fn all() -> Self {
        Self::default()
    }

    /// Pending messages still live at `step`.
    pub fn pending_at(step: u64) -> Self {
        Self::default()
            .with_status(StatusFilter::Pending)
            .as_of(step)
    }

    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = MessageCategory>) -> Self {
        self.categories = Some(categories.into_iter().collect());
        self
    }

    pub fn sent_after(mut self, step: u64) -> Self {
        self.sent_after_step = Some(step);
        self
    }

    pub fn as_of(mut self, step: u64) -> Self {
        self.as_of_step = Some(step);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a single message passes every filter.
    pub fn matches(&self, message: &Message) -> bool {
        if !self.status.admits(message) {
            return false;
        }
        if let Some(min) = self.min_confidence {
            if message.confidence() < min {
                return false;
            }
        }
        if let Some(ref categories) = self.categories {
            if !categories.contains(&message.category()) {
                return false;
            }
        }
        if let Some(after) = self.sent_after_step {
            if message.sent_at_step() <= after {
                return false;
            }
        }
        if let Some(step) = self.as_of_step {
            if message.is_expired_at(step) {
                return false;
            }
        }
        true
    }
}

/// Query ordering: confidence descending, then `sent_at_step` descending.
///
/// Callers sort with a stable sort so equal keys keep insertion order.
pub fn query_order(a: &Message, b: &Message) -> Ordering {
    b.confidence()
        .total_cmp(&a.confidence())
        .then_with(|| b.sent_at_step().cmp(&a.sent_at_step()))
}
