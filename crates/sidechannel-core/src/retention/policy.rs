//! Declarative per-category retention rules.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::domain::error::Result;
use crate::domain::message::{Message, MessageCategory};

use super::engine::RetentionEngine;

/// Which messages of a category survive truncation first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityRule {
    Newest,
    Oldest,
    /// Confidence descending, newer first on ties.
    #[default]
    HighestConfidence,
}

impl PriorityRule {
    /// Ordering with the highest-priority message first.
    pub fn compare(&self, a: &Message, b: &Message) -> Ordering {
        match self {
            PriorityRule::Newest => b.sent_at_step().cmp(&a.sent_at_step()),
            PriorityRule::Oldest => a.sent_at_step().cmp(&b.sent_at_step()),
            PriorityRule::HighestConfidence => b
                .confidence()
                .total_cmp(&a.confidence())
                .then_with(|| b.sent_at_step().cmp(&a.sent_at_step())),
        }
    }
}

/// Retention rules for one category. Stateless; supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub category: MessageCategory,
    /// Keep at most this many messages of the category.
    #[serde(default)]
    pub max_count: Option<usize>,
    /// Collapse same-fingerprint messages, keeping the newest.
    #[serde(default)]
    pub dedup: bool,
    /// Truncation order. Defaults to [`PriorityRule::HighestConfidence`].
    #[serde(default)]
    pub priority: Option<PriorityRule>,
    /// Drop messages below this confidence.
    #[serde(default)]
    pub min_confidence: Option<f64>,
}

impl RetentionPolicy {
    /// A policy that keeps everything in `category`.
    pub fn for_category(category: MessageCategory) -> Self {
        Self {
            category,
            max_count: None,
            dedup: false,
            priority: None,
            min_confidence: None,
        }
    }

    pub fn with_max_count(mut self, max: usize) -> Self {
        self.max_count = Some(max);
        self
    }

    pub fn with_dedup(mut self) -> Self {
        self.dedup = true;
        self
    }

    pub fn with_priority(mut self, rule: PriorityRule) -> Self {
        self.priority = Some(rule);
        self
    }

    pub fn with_min_confidence(mut self, floor: f64) -> Self {
        self.min_confidence = Some(floor);
        self
    }

    pub fn priority_rule(&self) -> PriorityRule {
        self.priority.unwrap_or_default()
    }
}

/// Serializable engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub policies: Vec<RetentionPolicy>,
    /// Cap on the total kept across all categories.
    pub global_cap: Option<usize>,
}

impl RetentionConfig {
    pub fn build(&self) -> Result<RetentionEngine> {
        RetentionEngine::new(self.policies.iter().cloned(), self.global_cap)
    }
}
