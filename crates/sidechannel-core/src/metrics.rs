//! Atomic counters for mailbox and dispatch activity.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a driving-loop step).
//!
//! Each store and coordinator owns an `Arc<Metrics>`; share one instance
//! between them to aggregate.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight atomic counters: no allocations, no locking.
#[derive(Debug, Default)]
pub struct Metrics {
    messages_accepted: AtomicU64,
    messages_deduplicated: AtomicU64,
    messages_evicted: AtomicU64,
    messages_collected: AtomicU64,
    handler_runs: AtomicU64,
    handler_failures: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            messages_accepted: AtomicU64::new(0),
            messages_deduplicated: AtomicU64::new(0),
            messages_evicted: AtomicU64::new(0),
            messages_collected: AtomicU64::new(0),
            handler_runs: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_accepted(&self) {
        self.messages_accepted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "messages_accepted", "counter incremented");
    }

    pub fn inc_deduplicated(&self) {
        self.messages_deduplicated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "messages_deduplicated", "counter incremented");
    }

    pub fn inc_evicted(&self) {
        self.messages_evicted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "messages_evicted", "counter incremented");
    }

    /// Add `n` messages removed by garbage collection.
    pub fn add_collected(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.messages_collected.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "messages_collected", n, "counter incremented");
    }

    pub fn inc_handler_runs(&self) {
        self.handler_runs.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "handler_runs", "counter incremented");
    }

    pub fn inc_handler_failures(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "handler_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            messages_accepted = self.messages_accepted(),
            messages_deduplicated = self.messages_deduplicated(),
            messages_evicted = self.messages_evicted(),
            messages_collected = self.messages_collected(),
            handler_runs = self.handler_runs(),
            handler_failures = self.handler_failures(),
        );
    }

    pub fn messages_accepted(&self) -> u64 {
        self.messages_accepted.load(Ordering::Relaxed)
    }

    pub fn messages_deduplicated(&self) -> u64 {
        self.messages_deduplicated.load(Ordering::Relaxed)
    }

    pub fn messages_evicted(&self) -> u64 {
        self.messages_evicted.load(Ordering::Relaxed)
    }

    pub fn messages_collected(&self) -> u64 {
        self.messages_collected.load(Ordering::Relaxed)
    }

    pub fn handler_runs(&self) -> u64 {
        self.handler_runs.load(Ordering::Relaxed)
    }

    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.messages_accepted.store(0, Ordering::Relaxed);
        self.messages_deduplicated.store(0, Ordering::Relaxed);
        self.messages_evicted.store(0, Ordering::Relaxed);
        self.messages_collected.store(0, Ordering::Relaxed);
        self.handler_runs.store(0, Ordering::Relaxed);
        self.handler_failures.store(0, Ordering::Relaxed);
    }
}
