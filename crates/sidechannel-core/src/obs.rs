//! Structured observability hooks for mailbox and dispatch events.
//!
//! This module provides:
//! - Thread-scoped tracing spans via `ThreadSpan` RAII guard
//! - Emission functions for key lifecycle events: accept, dedup, evict, gc,
//!   handler retry/failure, dispatch completion
//!
//! Message-level events are emitted at `debug!`, maintenance and dispatch
//! summaries at `info!`, handler failures at `warn!`.

use std::time::Duration;

use tracing::{debug, info, warn};

/// RAII guard that enters a thread-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = ThreadSpan::enter("thread-42");
/// // tracing calls are now associated with thread_id = "thread-42"
/// ```
pub struct ThreadSpan {
    _span: tracing::span::EnteredSpan,
}

impl ThreadSpan {
    pub fn enter(thread_id: &str) -> Self {
        let span = tracing::info_span!("sidechannel.thread", thread_id = %thread_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_message_accepted(thread_id: &str, message_id: &str, step: u64, category: &str) {
    debug!(
        event = "message.accepted",
        thread_id = %thread_id,
        message_id = %message_id,
        step = step,
        category = %category,
    );
}

pub fn emit_message_deduplicated(thread_id: &str, step: u64, fingerprint: &str) {
    debug!(
        event = "message.deduplicated",
        thread_id = %thread_id,
        step = step,
        fingerprint = %fingerprint,
    );
}

pub fn emit_message_evicted(thread_id: &str, message_id: &str, was_incorporated: bool) {
    debug!(
        event = "message.evicted",
        thread_id = %thread_id,
        message_id = %message_id,
        incorporated = was_incorporated,
    );
}

pub fn emit_gc_completed(thread_id: &str, at_step: u64, expired: usize, stale: usize) {
    info!(
        event = "gc.completed",
        thread_id = %thread_id,
        at_step = at_step,
        expired = expired,
        stale = stale,
    );
}

pub fn emit_handler_retrying(handler_id: &str, attempt: u32, delay: Duration) {
    debug!(
        event = "handler.retrying",
        handler_id = %handler_id,
        attempt = attempt,
        delay_ms = millis_saturating(delay),
    );
}

/// Whole milliseconds, pinned at `u64::MAX` for saturated backoff delays.
fn millis_saturating(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Handler exhausted its attempts (warning level).
pub fn emit_handler_failed(
    handler_id: &str,
    thread_id: &str,
    step: u64,
    attempts: u32,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "handler.failed",
        handler_id = %handler_id,
        thread_id = %thread_id,
        step = step,
        attempts = attempts,
        error = %error,
    );
}

pub fn emit_dispatch_completed(
    thread_id: &str,
    step: u64,
    ran: usize,
    skipped: usize,
    failed: usize,
    messages_sent: usize,
    short_circuited: bool,
) {
    info!(
        event = "dispatch.completed",
        thread_id = %thread_id,
        step = step,
        ran = ran,
        skipped = skipped,
        failed = failed,
        messages_sent = messages_sent,
        short_circuited = short_circuited,
    );
}
