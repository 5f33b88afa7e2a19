//! Observer handlers and their output.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::domain::message::Advisory;
use crate::domain::snapshot::StepSnapshot;

use super::filter::SnapshotFilter;

/// Boxed future returned by a handler invocation.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<HandlerOutput>>;

type HandlerFn = Arc<dyn Fn(Arc<StepSnapshot>) -> HandlerFuture + Send + Sync>;

/// What a handler produced for one snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    pub messages: Vec<Advisory>,
    /// Skip every lower-priority handler for this dispatch.
    pub short_circuit: bool,
}

impl HandlerOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, advisory: Advisory) -> Self {
        self.messages.push(advisory);
        self
    }

    pub fn stop(mut self) -> Self {
        self.short_circuit = true;
        self
    }
}

/// A prioritized, optionally filtered observer.
///
/// Cloning is cheap: the closure and filter are shared.
#[derive(Clone)]
pub struct DispatchHandler {
    id: String,
    priority: i32,
    filter: Option<SnapshotFilter>,
    run: HandlerFn,
}

impl std::fmt::Debug for DispatchHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandler")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl DispatchHandler {
    /// Wrap an async closure. Higher `priority` runs first.
    pub fn new<F, Fut>(id: impl Into<String>, priority: i32, handler: F) -> Self
    where
        F: Fn(Arc<StepSnapshot>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HandlerOutput>> + Send + 'static,
    {
        Self {
            id: id.into(),
            priority,
            filter: None,
            run: Arc::new(move |snapshot| handler(snapshot).boxed()),
        }
    }

    pub fn with_filter(mut self, filter: SnapshotFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn filter(&self) -> Option<&SnapshotFilter> {
        self.filter.as_ref()
    }

    /// True when there is no filter or the filter matches.
    pub fn accepts(&self, snapshot: &StepSnapshot) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(snapshot))
    }

    pub(crate) fn invoke(&self, snapshot: Arc<StepSnapshot>) -> HandlerFuture {
        (self.run)(snapshot)
    }
}
