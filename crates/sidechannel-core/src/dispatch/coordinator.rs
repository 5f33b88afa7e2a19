//! Runs prioritized handlers against a snapshot with retry and isolation.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::domain::error::SidechannelError;
use crate::domain::message::Advisory;
use crate::domain::snapshot::StepSnapshot;
use crate::metrics::Metrics;
use crate::obs;
use crate::store::MessageSink;

use super::error::{ErrorSink, HandlerFailure, TracingErrorSink};
use super::handler::{DispatchHandler, HandlerOutput};
use super::registry::HandlerRegistry;

/// Runtime dispatch configuration.
#[derive(Clone)]
pub struct DispatchConfig {
    /// Retries after the first attempt (0 = run once).
    pub max_retries: u32,
    /// Delay before retry `i` (0-based) is `backoff_base * 2^i`.
    pub backoff_base: Duration,
    /// Upper bound on a single backoff delay.
    pub backoff_cap: Option<Duration>,
    /// Stop the remaining handlers after the first exhausted failure.
    pub stop_on_error: bool,
    pub error_sink: Arc<dyn ErrorSink>,
}

impl std::fmt::Debug for DispatchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchConfig")
            .field("max_retries", &self.max_retries)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_cap", &self.backoff_cap)
            .field("stop_on_error", &self.stop_on_error)
            .finish_non_exhaustive()
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchSettings::default().to_config()
    }
}

impl DispatchConfig {
    pub fn with_error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.error_sink = Arc::new(sink);
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay between attempt `retry_index + 1` and `retry_index + 2`.
    ///
    /// Saturates at `Duration::MAX` when `base * 2^retry_index` overflows,
    /// then the cap applies.
    pub fn backoff_delay(&self, retry_index: u32) -> Duration {
        let delay = 2u32
            .checked_pow(retry_index)
            .and_then(|factor| self.backoff_base.checked_mul(factor))
            .unwrap_or(Duration::MAX);
        match self.backoff_cap {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Serializable form of [`DispatchConfig`] (durations in milliseconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: Option<u64>,
    pub stop_on_error: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_cap_ms: None,
            stop_on_error: false,
        }
    }
}

impl DispatchSettings {
    /// Build a runtime config with the default tracing error sink.
    pub fn to_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: self.backoff_cap_ms.map(Duration::from_millis),
            stop_on_error: self.stop_on_error,
            error_sink: Arc::new(TracingErrorSink),
        }
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Handlers invoked, in execution order (including ones that failed).
    pub ran: Vec<String>,
    /// Forwarded messages the store accepted.
    pub messages_sent: usize,
    /// Handlers whose filter rejected the snapshot.
    pub skipped: Vec<String>,
    pub errors: Vec<HandlerFailure>,
    pub short_circuited: bool,
}

/// Executes handlers and forwards their advisories into a [`MessageSink`].
#[derive(Clone)]
pub struct DispatchCoordinator {
    sink: Arc<dyn MessageSink>,
    config: DispatchConfig,
    metrics: Arc<Metrics>,
    /// Runtime for fire-and-forget dispatch, captured at construction.
    runtime: Option<Handle>,
}

impl std::fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCoordinator")
            .field("config", &self.config)
            .field("has_runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

impl DispatchCoordinator {
    /// Picks up the ambient tokio runtime, if any, for [`Self::spawn_dispatch`].
    pub fn new(sink: Arc<dyn MessageSink>, config: DispatchConfig) -> Self {
        Self {
            sink,
            config,
            metrics: Arc::new(Metrics::new()),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Spawn background dispatches on `handle`, so a synchronous caller
    /// outside any runtime context can still fire and forget.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Await mode: run every eligible handler to completion, retries included.
    ///
    /// Handlers run by priority descending; equal priorities keep their order
    /// in `handlers`.
    #[instrument(skip_all, fields(thread_id = %snapshot.thread_id, step = snapshot.step))]
    pub async fn dispatch(
        &self,
        snapshot: StepSnapshot,
        handlers: &[DispatchHandler],
    ) -> DispatchReport {
        let snapshot = Arc::new(snapshot);
        let mut ordered: Vec<&DispatchHandler> = handlers.iter().collect();
        ordered.sort_by(|a, b| b.priority().cmp(&a.priority()));

        let mut report = DispatchReport::default();
        for handler in ordered {
            if !handler.accepts(&snapshot) {
                report.skipped.push(handler.id().to_string());
                continue;
            }

            report.ran.push(handler.id().to_string());
            self.metrics.inc_handler_runs();

            match self.run_with_retries(handler, &snapshot).await {
                Ok(output) => {
                    report.messages_sent += self.forward(handler, &snapshot, output.messages);
                    if output.short_circuit {
                        report.short_circuited = true;
                        break;
                    }
                }
                Err(failure) => {
                    self.metrics.inc_handler_failures();
                    self.report_failure(&failure, &snapshot);
                    report.errors.push(failure);
                    if self.config.stop_on_error {
                        break;
                    }
                }
            }
        }

        obs::emit_dispatch_completed(
            &snapshot.thread_id,
            snapshot.step,
            report.ran.len(),
            report.skipped.len(),
            report.errors.len(),
            report.messages_sent,
            report.short_circuited,
        );
        report
    }

    /// Await mode over a registry, in registry order.
    pub async fn dispatch_registry(
        &self,
        snapshot: StepSnapshot,
        registry: &HandlerRegistry,
    ) -> DispatchReport {
        self.dispatch(snapshot, &registry.ordered()).await
    }

    /// Fire-and-forget mode: run on the tokio runtime without blocking.
    ///
    /// Uses the runtime given to [`Self::with_runtime`], else the one captured
    /// at construction, else the caller's current one. Returns
    /// [`SidechannelError::NoRuntime`] when none is reachable.
    ///
    /// Failures still reach the configured error sink. Dropping the handle
    /// detaches the task; there is no cancellation.
    pub fn spawn_dispatch(
        &self,
        snapshot: StepSnapshot,
        handlers: Vec<DispatchHandler>,
    ) -> crate::domain::Result<JoinHandle<DispatchReport>> {
        let runtime = match &self.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| SidechannelError::NoRuntime)?,
        };
        let coordinator = self.clone();
        Ok(runtime.spawn(async move { coordinator.dispatch(snapshot, &handlers).await }))
    }

    /// Hand an exhausted failure to the error sink. A panicking sink is
    /// logged and swallowed.
    fn report_failure(&self, failure: &HandlerFailure, snapshot: &StepSnapshot) {
        let sink = &self.config.error_sink;
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| {
            sink.on_handler_failure(failure, snapshot)
        })) {
            warn!(
                handler_id = %failure.handler_id,
                panic = %panic_message(payload.as_ref()),
                "error sink panicked"
            );
        }
    }

    /// Up to `max_retries + 1` attempts. Panics count as failures.
    async fn run_with_retries(
        &self,
        handler: &DispatchHandler,
        snapshot: &Arc<StepSnapshot>,
    ) -> Result<HandlerOutput, HandlerFailure> {
        let max_attempts = self.config.max_retries.saturating_add(1);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match invoke_isolated(handler, snapshot).await {
                Ok(output) => return Ok(output),
                Err(error) => error,
            };

            if attempt >= max_attempts {
                return Err(HandlerFailure {
                    handler_id: handler.id().to_string(),
                    thread_id: snapshot.thread_id.clone(),
                    step: snapshot.step,
                    attempts: attempt,
                    error,
                });
            }

            let delay = self.config.backoff_delay(attempt - 1);
            obs::emit_handler_retrying(handler.id(), attempt + 1, delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Forward advisories with thread/step from the snapshot and the handler
    /// id as default sender. Returns how many the sink accepted.
    fn forward(
        &self,
        handler: &DispatchHandler,
        snapshot: &StepSnapshot,
        advisories: Vec<Advisory>,
    ) -> usize {
        let mut accepted = 0;
        for advisory in advisories {
            let message = advisory.into_new_message(&snapshot.thread_id, snapshot.step, handler.id());
            match self.sink.deliver(message) {
                Ok(true) => accepted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(handler_id = %handler.id(), error = %e, "dropped malformed advisory");
                }
            }
        }
        accepted
    }
}

/// One attempt, with panics (sync or async) turned into errors.
async fn invoke_isolated(
    handler: &DispatchHandler,
    snapshot: &Arc<StepSnapshot>,
) -> Result<HandlerOutput, String> {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| {
        handler.invoke(Arc::clone(snapshot))
    })) {
        Ok(future) => future,
        Err(payload) => return Err(panic_message(payload.as_ref())),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
