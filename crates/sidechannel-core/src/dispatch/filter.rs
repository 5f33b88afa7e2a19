//! Composable predicates deciding whether a handler sees a snapshot.

use std::sync::Arc;

use regex::Regex;

use crate::domain::error::Result;
use crate::domain::snapshot::StepSnapshot;

type Predicate = Arc<dyn Fn(&StepSnapshot) -> bool + Send + Sync>;

/// A cloneable snapshot predicate with `and` / `or` / `!` combinators.
#[derive(Clone)]
pub struct SnapshotFilter {
    predicate: Predicate,
}

impl std::fmt::Debug for SnapshotFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SnapshotFilter")
    }
}

impl SnapshotFilter {
    pub fn new(predicate: impl Fn(&StepSnapshot) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    pub fn matches(&self, snapshot: &StepSnapshot) -> bool {
        (self.predicate)(snapshot)
    }

    pub fn always() -> Self {
        Self::new(|_| true)
    }

    pub fn and(self, other: SnapshotFilter) -> Self {
        Self::new(move |s| self.matches(s) && other.matches(s))
    }

    pub fn or(self, other: SnapshotFilter) -> Self {
        Self::new(move |s| self.matches(s) || other.matches(s))
    }

    /// Matches when every filter matches (vacuously true when empty).
    pub fn all_of(filters: impl IntoIterator<Item = SnapshotFilter>) -> Self {
        let filters: Vec<SnapshotFilter> = filters.into_iter().collect();
        Self::new(move |s| filters.iter().all(|f| f.matches(s)))
    }

    /// Matches when any filter matches (false when empty).
    pub fn any_of(filters: impl IntoIterator<Item = SnapshotFilter>) -> Self {
        let filters: Vec<SnapshotFilter> = filters.into_iter().collect();
        Self::new(move |s| filters.iter().any(|f| f.matches(s)))
    }

    pub fn min_step(step: u64) -> Self {
        Self::new(move |s| s.step >= step)
    }

    /// Steps divisible by `n`. `n == 0` is treated as 1.
    pub fn every_nth_step(n: u64) -> Self {
        let n = n.max(1);
        Self::new(move |s| s.step % n == 0)
    }

    pub fn outcome_contains(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self::new(move |s| s.outcome.contains(&needle))
    }

    pub fn outcome_matches(pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)?;
        Ok(Self::new(move |s| re.is_match(&s.outcome)))
    }

    pub fn has_memory_key(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(move |s| s.memory.contains_key(&key))
    }
}

impl std::ops::Not for SnapshotFilter {
    type Output = SnapshotFilter;

    fn not(self) -> Self::Output {
        SnapshotFilter::new(move |s| !self.matches(s))
    }
}
