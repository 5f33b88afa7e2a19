//! Handler failure reporting.

use serde::{Deserialize, Serialize};

use crate::domain::snapshot::StepSnapshot;
use crate::obs;

/// A handler that failed on every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerFailure {
    pub handler_id: String,
    pub thread_id: String,
    pub step: u64,
    /// Total attempts made, including the first.
    pub attempts: u32,
    pub error: String,
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "handler {} failed after {} attempt(s): {}",
            self.handler_id, self.attempts, self.error
        )
    }
}

/// Receives exhausted handler failures. Never called for a failure that a
/// later retry recovered from.
pub trait ErrorSink: Send + Sync {
    fn on_handler_failure(&self, failure: &HandlerFailure, snapshot: &StepSnapshot);
}

/// Default sink: log at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn on_handler_failure(&self, failure: &HandlerFailure, snapshot: &StepSnapshot) {
        obs::emit_handler_failed(
            &failure.handler_id,
            &snapshot.thread_id,
            snapshot.step,
            failure.attempts,
            &failure.error,
        );
    }
}

impl<F> ErrorSink for F
where
    F: Fn(&HandlerFailure, &StepSnapshot) + Send + Sync,
{
    fn on_handler_failure(&self, failure: &HandlerFailure, snapshot: &StepSnapshot) {
        self(failure, snapshot)
    }
}
