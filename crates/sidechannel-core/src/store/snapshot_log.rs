//! Bounded per-thread FIFO of step snapshots.

use std::collections::{HashMap, VecDeque};

use crate::domain::snapshot::StepSnapshot;

/// Per-thread ring buffer; the oldest snapshot is dropped on overflow.
#[derive(Debug, Clone)]
pub struct SnapshotLog {
    capacity: usize,
    threads: HashMap<String, VecDeque<StepSnapshot>>,
}

impl SnapshotLog {
    /// `capacity` is clamped to at least one entry per thread.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            threads: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a snapshot, returning the one evicted to make room, if any.
    pub fn push(&mut self, snapshot: StepSnapshot) -> Option<StepSnapshot> {
        let capacity = self.capacity;
        let ring = self
            .threads
            .entry(snapshot.thread_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        let evicted = if ring.len() >= capacity {
            ring.pop_front()
        } else {
            None
        };
        ring.push_back(snapshot);
        evicted
    }

    /// All retained snapshots for a thread, oldest first.
    pub fn snapshots(&self, thread_id: &str) -> Vec<StepSnapshot> {
        self.threads
            .get(thread_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The last `n` snapshots for a thread, oldest first.
    pub fn recent(&self, thread_id: &str, n: usize) -> Vec<StepSnapshot> {
        self.threads
            .get(thread_id)
            .map(|ring| {
                let skip = ring.len().saturating_sub(n);
                ring.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn latest(&self, thread_id: &str) -> Option<&StepSnapshot> {
        self.threads.get(thread_id).and_then(|ring| ring.back())
    }

    pub fn len(&self, thread_id: &str) -> usize {
        self.threads.get(thread_id).map_or(0, VecDeque::len)
    }

    pub fn clear_thread(&mut self, thread_id: &str) {
        self.threads.remove(thread_id);
    }
}
