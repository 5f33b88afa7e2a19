//! Dispatch: run prioritized observer handlers against a step snapshot.
//!
//! # Modules
//!
//! - [`filter`]: composable `SnapshotFilter` predicates
//! - [`handler`]: `DispatchHandler` and its `HandlerOutput`
//! - [`registry`]: id-keyed `HandlerRegistry`
//! - [`error`]: `HandlerFailure` and the `ErrorSink` seam
//! - [`coordinator`]: `DispatchCoordinator` with retry, backoff, and
//!   await / fire-and-forget modes

pub mod coordinator;
pub mod error;
pub mod filter;
pub mod handler;
pub mod registry;

pub use coordinator::{DispatchConfig, DispatchCoordinator, DispatchReport, DispatchSettings};
pub use error::{ErrorSink, HandlerFailure, TracingErrorSink};
pub use filter::SnapshotFilter;
pub use handler::{DispatchHandler, HandlerFuture, HandlerOutput};
pub use registry::HandlerRegistry;
