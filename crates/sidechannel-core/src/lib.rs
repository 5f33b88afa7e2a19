//! sidechannel core library
//!
//! A step-scoped advisory mailbox for agent loops. Observers post short-lived
//! messages into per-thread mailboxes; the main loop queries them once per
//! step, marks what it used, and collects the rest.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod retention;
pub mod store;
pub mod telemetry;

pub use clock::{Clock, IdGenerator, ManualClock, SequentialIdGenerator, SystemClock, UuidIdGenerator};

pub use collaborators::{
    ContentFormatter, FailureDetector, FailureVerdict, ResponseDescriptor, Sanitizer, Severity,
};

pub use config::SidechannelConfig;

pub use dispatch::{
    DispatchConfig, DispatchCoordinator, DispatchHandler, DispatchReport, DispatchSettings,
    ErrorSink, HandlerFailure, HandlerOutput, HandlerRegistry, SnapshotFilter, TracingErrorSink,
};

pub use domain::{
    Advisory, Message, MessageCategory, NewMessage, Result, SidechannelError, StepSnapshot,
    ValidationError,
};

pub use retention::{
    PriorityRule, RetentionConfig, RetentionEngine, RetentionOutcome, RetentionPolicy,
    RetentionStats,
};

pub use store::{
    GcReport, MessageQuery, MessageSink, MessageStore, SharedStore, StatusFilter, StoreConfig,
};

pub use metrics::Metrics;
pub use obs::ThreadSpan;
pub use telemetry::init_tracing;

/// sidechannel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
