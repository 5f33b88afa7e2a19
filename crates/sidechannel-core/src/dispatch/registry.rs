//! Named handler registry.

use std::collections::HashMap;

use crate::domain::error::{Result, SidechannelError};

use super::handler::DispatchHandler;

/// Id-keyed handler set. Ids are unique; registration order breaks
/// priority ties.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, (u64, DispatchHandler)>,
    next_seq: u64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `HandlerAlreadyRegistered` if the id is taken.
    pub fn register(&mut self, handler: DispatchHandler) -> Result<()> {
        if self.handlers.contains_key(handler.id()) {
            return Err(SidechannelError::HandlerAlreadyRegistered(
                handler.id().to_string(),
            ));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.handlers
            .insert(handler.id().to_string(), (seq, handler));
        Ok(())
    }

    pub fn unregister(&mut self, id: &str) -> Result<DispatchHandler> {
        self.handlers
            .remove(id)
            .map(|(_, handler)| handler)
            .ok_or_else(|| SidechannelError::HandlerNotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<&DispatchHandler> {
        self.handlers.get(id).map(|(_, handler)| handler)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handlers in execution order: priority descending, then registration order.
    pub fn ordered(&self) -> Vec<DispatchHandler> {
        let mut entries: Vec<&(u64, DispatchHandler)> = self.handlers.values().collect();
        entries.sort_by(|(seq_a, a), (seq_b, b)| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| seq_a.cmp(seq_b))
        });
        entries.into_iter().map(|(_, h)| h.clone()).collect()
    }
}
