//! Shareable handle over a [`MessageStore`] for dispatch tasks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::error::Result;
use crate::domain::message::{Message, NewMessage};
use crate::domain::snapshot::StepSnapshot;

use super::mailbox::{GcReport, MessageStore};
use super::query::MessageQuery;

/// Where dispatch forwards handler output.
///
/// `deliver` has `send` semantics: `Ok(true)` accepted, `Ok(false)`
/// deduplicated, `Err` malformed.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, message: NewMessage) -> Result<bool>;
}

/// Cloneable `Arc<Mutex<MessageStore>>`.
///
/// The mutex only serializes the hand-off between the driving loop and
/// detached dispatch tasks. Every call holds the lock for one synchronous
/// store operation.
#[derive(Debug, Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<MessageStore>>,
}

impl SharedStore {
    pub fn new(store: MessageStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Lock the store. A poisoned lock is recovered: store operations leave
    /// the mailbox consistent between statements.
    pub fn lock(&self) -> MutexGuard<'_, MessageStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a closure with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut MessageStore) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn send(&self, candidate: NewMessage) -> Result<bool> {
        self.lock().send(candidate)
    }

    pub fn query(&self, thread_id: &str, query: &MessageQuery) -> Vec<Message> {
        self.lock().query(thread_id, query)
    }

    pub fn mark_incorporated<I, S>(&self, ids: I, at_step: u64) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.lock().mark_incorporated(ids, at_step)
    }

    pub fn gc(&self, thread_id: &str, at_step: u64) -> GcReport {
        self.lock().gc(thread_id, at_step)
    }

    pub fn store_snapshot(&self, snapshot: StepSnapshot) {
        self.lock().store_snapshot(snapshot);
    }

    pub fn snapshots(&self, thread_id: &str) -> Vec<StepSnapshot> {
        self.lock().snapshots(thread_id)
    }
}

impl MessageSink for SharedStore {
    fn deliver(&self, message: NewMessage) -> Result<bool> {
        self.send(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageCategory;
    use crate::store::StoreConfig;

    #[test]
    fn test_clones_share_state() {
        let shared = SharedStore::new(MessageStore::new(StoreConfig::default()).unwrap());
        let other = shared.clone();
        assert!(other
            .deliver(NewMessage::new(
                "t",
                "obs",
                1,
                MessageCategory::Insight,
                "hello"
            ))
            .unwrap());
        assert_eq!(shared.query("t", &MessageQuery::all()).len(), 1);
        assert_eq!(shared.with(|s| s.total_len()), 1);
    }
}
