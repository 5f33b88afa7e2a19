//! Per-step record of what the driving loop saw and did.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable record of a single step, built once by the driving loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepSnapshot {
    pub thread_id: String,
    pub step: u64,
    pub walltime: DateTime<Utc>,

    /// The context or prompt the consumer acted on.
    #[serde(default)]
    pub prompt: String,

    /// Opaque auxiliary memory.
    #[serde(default)]
    pub memory: BTreeMap<String, serde_json::Value>,

    /// What the consumer produced this step.
    #[serde(default)]
    pub outcome: String,

    /// Ids of messages incorporated this step.
    #[serde(default)]
    pub incorporated_message_ids: Vec<String>,
}

impl StepSnapshot {
    pub fn new(thread_id: impl Into<String>, step: u64, walltime: DateTime<Utc>) -> Self {
        Self {
            thread_id: thread_id.into(),
            step,
            walltime,
            prompt: String::new(),
            memory: BTreeMap::new(),
            outcome: String::new(),
            incorporated_message_ids: Vec::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = outcome.into();
        self
    }

    pub fn with_memory(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.memory.insert(key.into(), value);
        self
    }

    pub fn with_incorporated(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.incorporated_message_ids.extend(ids);
        self
    }
}
