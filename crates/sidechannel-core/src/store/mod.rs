//! Store: per-thread advisory mailboxes with dedup, step TTL, and capacity.
//!
//! # Modules
//!
//! - [`config`]: `StoreConfig` limits
//! - [`query`]: `MessageQuery`, `StatusFilter`, and the query ordering
//! - [`mailbox`]: `MessageStore` (send / query / mark / gc) and `GcReport`
//! - [`snapshot_log`]: bounded per-thread `SnapshotLog`
//! - [`shared`]: `SharedStore` handle and the `MessageSink` seam used by dispatch

pub mod config;
pub mod mailbox;
pub mod query;
pub mod shared;
pub mod snapshot_log;

pub use config::StoreConfig;
pub use mailbox::{GcReport, MessageStore};
pub use query::{query_order, MessageQuery, StatusFilter};
pub use shared::{MessageSink, SharedStore};
pub use snapshot_log::SnapshotLog;
