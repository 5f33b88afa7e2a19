//! Interfaces for the pieces the host loop supplies around the mailbox.
//!
//! The core never renders, sanitizes, or classifies on its own. A driving loop
//! typically queries pending messages, runs them through a [`ContentFormatter`],
//! and feeds the model response to a [`FailureDetector`] before building the
//! next snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::message::Message;

/// Renders retained messages into prompt text.
pub trait ContentFormatter: Send + Sync {
    fn format(&self, messages: &[Message]) -> String;
}

/// Cleans untrusted text before it reaches a prompt.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, text: &str) -> String;
}

/// Classifies a step's response as failed or not.
pub trait FailureDetector: Send + Sync {
    fn detect(&self, response: &ResponseDescriptor) -> FailureVerdict;
}

/// What the host loop observed for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseDescriptor {
    pub thread_id: String,
    pub step: u64,
    pub content: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureVerdict {
    pub is_failure: bool,
    pub reason: String,
    pub severity: Severity,
}

impl FailureVerdict {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failure(reason: impl Into<String>, severity: Severity) -> Self {
        Self {
            is_failure: true,
            reason: reason.into(),
            severity,
        }
    }
}
