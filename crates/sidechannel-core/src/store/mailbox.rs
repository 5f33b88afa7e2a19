//! In-memory message store: per-thread mailboxes plus the snapshot log.
//!
//! All operations are synchronous and never suspend. The store has no
//! internal locking; callers serialize mutation per thread (see
//! [`SharedStore`](super::SharedStore) for the async hand-off case).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, IdGenerator, SystemClock, UuidIdGenerator};
use crate::domain::error::Result;
use crate::domain::message::{fingerprint_text, Message, NewMessage};
use crate::domain::snapshot::StepSnapshot;
use crate::metrics::Metrics;
use crate::obs;

use super::config::StoreConfig;
use super::query::{query_order, MessageQuery};
use super::snapshot_log::SnapshotLog;

/// Result of a garbage-collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    /// Removed because `expires_at_step <= at_step`.
    pub expired: usize,
    /// Removed because incorporated longer ago than the retention window.
    pub stale: usize,
    pub remaining: usize,
}

impl GcReport {
    pub fn removed(&self) -> usize {
        self.expired + self.stale
    }

    fn absorb(&mut self, other: &GcReport) {
        self.expired += other.expired;
        self.stale += other.stale;
        self.remaining += other.remaining;
    }
}

/// Per-thread advisory mailboxes.
///
/// Messages within a thread are held in insertion order; that order is the
/// final tiebreak for both query sorting and capacity eviction.
pub struct MessageStore {
    config: StoreConfig,
    mailboxes: HashMap<String, Vec<Message>>,
    snapshots: SnapshotLog,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("config", &self.config)
            .field("threads", &self.mailboxes.len())
            .field("messages", &self.total_len())
            .finish_non_exhaustive()
    }
}

impl MessageStore {
    /// Store backed by the system clock and random UUIDs.
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_collaborators(config, Arc::new(SystemClock::new()), Arc::new(UuidIdGenerator))
    }

    /// Store with injected clock and id source.
    pub fn with_collaborators(
        config: StoreConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            snapshots: SnapshotLog::new(config.snapshot_capacity),
            config,
            mailboxes: HashMap::new(),
            clock,
            ids,
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Share a metrics instance with other components.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Append a message unless it duplicates a recent one in the same thread.
    ///
    /// Returns `Ok(false)` on dedup rejection (nothing changes) and an error
    /// only for malformed candidates.
    pub fn send(&mut self, candidate: NewMessage) -> Result<bool> {
        candidate.validate()?;
        let _span = obs::ThreadSpan::enter(&candidate.thread_id);

        let step = candidate.sent_at_step;
        let fingerprint = fingerprint_text(&candidate.text);
        if self.is_duplicate(&candidate.thread_id, &fingerprint, step) {
            self.metrics.inc_deduplicated();
            obs::emit_message_deduplicated(&candidate.thread_id, step, &fingerprint);
            return Ok(false);
        }

        let message = Message::from_new(
            self.ids.next_id(),
            candidate,
            self.clock.now(),
            self.config.default_ttl_steps,
        );
        let thread_id = message.thread_id().to_string();
        obs::emit_message_accepted(
            &thread_id,
            message.id(),
            step,
            message.category().as_str(),
        );
        self.mailboxes
            .entry(thread_id.clone())
            .or_default()
            .push(message);
        self.metrics.inc_accepted();

        self.enforce_capacity(&thread_id);
        Ok(true)
    }

    fn is_duplicate(&self, thread_id: &str, fingerprint: &str, step: u64) -> bool {
        let window = step.saturating_sub(self.config.dedupe_window_steps)..=step;
        self.mailboxes.get(thread_id).is_some_and(|mailbox| {
            mailbox
                .iter()
                .any(|m| m.fingerprint() == fingerprint && window.contains(&m.sent_at_step()))
        })
    }

    /// Evict until the thread is within `max_per_thread`: oldest incorporated
    /// first, then oldest pending. Returns the number evicted.
    fn enforce_capacity(&mut self, thread_id: &str) -> usize {
        let max = self.config.max_per_thread;
        let Some(mailbox) = self.mailboxes.get_mut(thread_id) else {
            return 0;
        };

        let mut evicted = 0;
        while mailbox.len() > max {
            let victim = oldest_position(mailbox, Message::is_incorporated)
                .or_else(|| oldest_position(mailbox, Message::is_pending));
            let Some(pos) = victim else {
                break;
            };
            let removed = mailbox.remove(pos);
            obs::emit_message_evicted(thread_id, removed.id(), removed.is_incorporated());
            self.metrics.inc_evicted();
            evicted += 1;
        }
        evicted
    }

    /// Filtered, ordered view of a thread's mailbox. Never mutates.
    pub fn query(&self, thread_id: &str, query: &MessageQuery) -> Vec<Message> {
        let Some(mailbox) = self.mailboxes.get(thread_id) else {
            return Vec::new();
        };
        let mut matches: Vec<Message> = mailbox
            .iter()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        matches.sort_by(query_order);
        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        matches
    }

    /// Mark pending messages as incorporated at `at_step`, across all threads.
    ///
    /// Unknown or already incorporated ids are ignored. Returns how many
    /// messages changed state.
    pub fn mark_incorporated<I, S>(&mut self, ids: I, at_step: u64) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: HashSet<String> = ids.into_iter().map(|s| s.as_ref().to_string()).collect();
        if wanted.is_empty() {
            return 0;
        }

        let mut marked = 0;
        for mailbox in self.mailboxes.values_mut() {
            for message in mailbox.iter_mut().filter(|m| wanted.contains(m.id())) {
                if message.mark_incorporated(at_step) {
                    marked += 1;
                }
            }
        }
        marked
    }

    /// Remove expired messages and incorporated messages older than the
    /// retention window. Only ever runs when called.
    pub fn gc(&mut self, thread_id: &str, at_step: u64) -> GcReport {
        let _span = obs::ThreadSpan::enter(thread_id);
        let stale_before = at_step.checked_sub(self.config.incorporated_retention_steps);
        let Some(mailbox) = self.mailboxes.get_mut(thread_id) else {
            return GcReport::default();
        };

        let mut report = GcReport::default();
        mailbox.retain(|m| {
            if m.is_expired_at(at_step) {
                report.expired += 1;
                return false;
            }
            if let (Some(incorporated), Some(cutoff)) = (m.incorporated_at_step(), stale_before) {
                if incorporated < cutoff {
                    report.stale += 1;
                    return false;
                }
            }
            true
        });
        report.remaining = mailbox.len();
        if report.remaining == 0 {
            self.mailboxes.remove(thread_id);
        }

        self.metrics.add_collected(report.removed() as u64);
        obs::emit_gc_completed(thread_id, at_step, report.expired, report.stale);
        report
    }

    /// Run [`gc`](Self::gc) over every thread and sum the reports.
    pub fn gc_all(&mut self, at_step: u64) -> GcReport {
        let mut total = GcReport::default();
        for thread_id in self.thread_ids() {
            total.absorb(&self.gc(&thread_id, at_step));
        }
        total
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.mailboxes
            .values()
            .flat_map(|mailbox| mailbox.iter())
            .find(|m| m.id() == message_id)
    }

    /// Threads that currently hold at least one message, sorted.
    pub fn thread_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.mailboxes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self, thread_id: &str) -> usize {
        self.mailboxes.get(thread_id).map_or(0, Vec::len)
    }

    pub fn total_len(&self) -> usize {
        self.mailboxes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }

    pub fn store_snapshot(&mut self, snapshot: StepSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// Retained snapshots for a thread, oldest first.
    pub fn snapshots(&self, thread_id: &str) -> Vec<StepSnapshot> {
        self.snapshots.snapshots(thread_id)
    }

    pub fn recent_snapshots(&self, thread_id: &str, n: usize) -> Vec<StepSnapshot> {
        self.snapshots.recent(thread_id, n)
    }

    pub fn latest_snapshot(&self, thread_id: &str) -> Option<&StepSnapshot> {
        self.snapshots.latest(thread_id)
    }

    pub fn snapshot_count(&self, thread_id: &str) -> usize {
        self.snapshots.len(thread_id)
    }

    /// Snapshots retained per thread.
    pub fn snapshot_capacity(&self) -> usize {
        self.snapshots.capacity()
    }

    /// Drop a finished thread's snapshot history. Messages are untouched.
    pub fn clear_snapshots(&mut self, thread_id: &str) {
        self.snapshots.clear_thread(thread_id);
    }
}

/// Position of the oldest message matching `pred`: lowest `sent_at_step`,
/// ties broken by insertion order.
fn oldest_position(mailbox: &[Message], pred: impl Fn(&Message) -> bool) -> Option<usize> {
    mailbox
        .iter()
        .enumerate()
        .filter(|(_, m)| pred(*m))
        .min_by_key(|(idx, m)| (m.sent_at_step(), *idx))
        .map(|(idx, _)| idx)
}
