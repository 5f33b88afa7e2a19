//! Retention: category-aware, confidence-aware culling of message sets.
//!
//! The engine is a pure function over caller-supplied policies. It never
//! touches a store; callers typically run it over a query result before
//! handing the kept set to a formatter.

pub mod engine;
pub mod policy;

pub use engine::{
    CategoryStats, CullReason, CulledMessage, RetentionEngine, RetentionOutcome, RetentionStats,
};
pub use policy::{PriorityRule, RetentionConfig, RetentionPolicy};
