//! Category-aware culling of a message set.
//!
//! Per category, in [`MessageCategory::ALL`] order:
//! 1. Drop messages below the confidence floor
//! 2. Collapse duplicate fingerprints (keep the newest)
//! 3. Sort by the category's priority rule
//! 4. Truncate to the category's max count
//!
//! Then the kept sets are flattened and, if a global cap is exceeded, sorted
//! by confidence descending and truncated.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, SidechannelError};
use crate::domain::message::{validate_confidence, Message, MessageCategory};

use super::policy::RetentionPolicy;

/// Why a message was culled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CullReason {
    BelowConfidence,
    Duplicate,
    CategoryLimit,
    GlobalCap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CulledMessage {
    pub message: Message,
    pub reason: CullReason,
}

/// Counts for one category. `kept` plus the culled counts equals `input`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub input: usize,
    pub kept: usize,
    pub culled_by_confidence: usize,
    pub culled_by_dedup: usize,
    pub culled_by_type: usize,
    pub culled_by_global_cap: usize,
}

impl CategoryStats {
    pub fn culled(&self) -> usize {
        self.culled_by_confidence
            + self.culled_by_dedup
            + self.culled_by_type
            + self.culled_by_global_cap
    }

    fn record(&mut self, reason: CullReason) {
        match reason {
            CullReason::BelowConfidence => self.culled_by_confidence += 1,
            CullReason::Duplicate => self.culled_by_dedup += 1,
            CullReason::CategoryLimit => self.culled_by_type += 1,
            CullReason::GlobalCap => self.culled_by_global_cap += 1,
        }
    }
}

/// Totals for a retention pass. Every input message is counted exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionStats {
    pub total_input: usize,
    pub total_kept: usize,
    pub total_culled: usize,
    pub culled_by_confidence: usize,
    pub culled_by_dedup: usize,
    pub culled_by_type: usize,
    pub culled_by_global_cap: usize,
    pub per_category: BTreeMap<MessageCategory, CategoryStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionOutcome {
    pub keep: Vec<Message>,
    pub cull: Vec<CulledMessage>,
    pub stats: RetentionStats,
}

/// Pure retention engine over caller-supplied policies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionEngine {
    policies: BTreeMap<MessageCategory, RetentionPolicy>,
    global_cap: Option<usize>,
}

impl RetentionEngine {
    /// Build an engine. At most one policy per category; confidence floors
    /// must lie in `[0, 1]`.
    pub fn new(
        policies: impl IntoIterator<Item = RetentionPolicy>,
        global_cap: Option<usize>,
    ) -> Result<Self> {
        let mut by_category = BTreeMap::new();
        for policy in policies {
            if let Some(floor) = policy.min_confidence {
                validate_confidence(floor)?;
            }
            let category = policy.category;
            if by_category.insert(category, policy).is_some() {
                return Err(SidechannelError::InvalidConfig(format!(
                    "duplicate retention policy for category {category}"
                )));
            }
        }
        Ok(Self {
            policies: by_category,
            global_cap,
        })
    }

    pub fn policy(&self, category: MessageCategory) -> Option<&RetentionPolicy> {
        self.policies.get(&category)
    }

    pub fn global_cap(&self) -> Option<usize> {
        self.global_cap
    }

    /// Split `messages` into kept and culled sets. Does not mutate input.
    pub fn apply(&self, messages: &[Message]) -> RetentionOutcome {
        let mut per_category: BTreeMap<MessageCategory, CategoryStats> = BTreeMap::new();
        let mut cull: Vec<CulledMessage> = Vec::new();
        let mut kept_all: Vec<Message> = Vec::new();

        for category in MessageCategory::ALL {
            let group: Vec<&Message> = messages
                .iter()
                .filter(|m| m.category() == category)
                .collect();
            if group.is_empty() {
                continue;
            }
            let stats = per_category.entry(category).or_default();
            stats.input = group.len();

            let mut culled_here: Vec<(&Message, CullReason)> = Vec::new();
            let kept = match self.policies.get(&category) {
                Some(policy) => cull_group(group, policy, &mut culled_here),
                None => group,
            };

            for (message, reason) in culled_here {
                stats.record(reason);
                cull.push(CulledMessage {
                    message: message.clone(),
                    reason,
                });
            }
            kept_all.extend(kept.into_iter().cloned());
        }

        if let Some(cap) = self.global_cap {
            if kept_all.len() > cap {
                kept_all.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
                for message in kept_all.split_off(cap) {
                    per_category
                        .entry(message.category())
                        .or_default()
                        .record(CullReason::GlobalCap);
                    cull.push(CulledMessage {
                        message,
                        reason: CullReason::GlobalCap,
                    });
                }
            }
        }

        for stats in per_category.values_mut() {
            stats.kept = stats.input - stats.culled();
        }

        let stats = RetentionStats {
            total_input: messages.len(),
            total_kept: kept_all.len(),
            total_culled: cull.len(),
            culled_by_confidence: per_category.values().map(|s| s.culled_by_confidence).sum(),
            culled_by_dedup: per_category.values().map(|s| s.culled_by_dedup).sum(),
            culled_by_type: per_category.values().map(|s| s.culled_by_type).sum(),
            culled_by_global_cap: per_category.values().map(|s| s.culled_by_global_cap).sum(),
            per_category,
        };

        RetentionOutcome {
            keep: kept_all,
            cull,
            stats,
        }
    }
}

/// Run the four per-category phases, pushing culled messages with reasons.
fn cull_group<'a>(
    group: Vec<&'a Message>,
    policy: &RetentionPolicy,
    culled: &mut Vec<(&'a Message, CullReason)>,
) -> Vec<&'a Message> {
    let mut kept = group;

    if let Some(floor) = policy.min_confidence {
        let (pass, fail): (Vec<&Message>, Vec<&Message>) =
            kept.into_iter().partition(|m| m.confidence() >= floor);
        culled.extend(fail.into_iter().map(|m| (m, CullReason::BelowConfidence)));
        kept = pass;
    }

    if policy.dedup {
        let (unique, duplicates) = collapse_duplicates(kept);
        culled.extend(duplicates.into_iter().map(|m| (m, CullReason::Duplicate)));
        kept = unique;
    }

    let rule = policy.priority_rule();
    kept.sort_by(|a, b| rule.compare(a, b));

    if let Some(max) = policy.max_count {
        if kept.len() > max {
            let overflow = kept.split_off(max);
            culled.extend(overflow.into_iter().map(|m| (m, CullReason::CategoryLimit)));
        }
    }

    kept
}

/// Keep one message per fingerprint: the greatest `sent_at_step`, first seen
/// on ties. Returns `(survivors, duplicates)`, each in input order.
fn collapse_duplicates(group: Vec<&Message>) -> (Vec<&Message>, Vec<&Message>) {
    let mut best: HashMap<&str, usize> = HashMap::new();
    for (idx, message) in group.iter().enumerate() {
        match best.get(message.fingerprint()) {
            Some(&current) if group[current].sent_at_step() >= message.sent_at_step() => {}
            _ => {
                best.insert(message.fingerprint(), idx);
            }
        }
    }
    let winners: HashSet<usize> = best.into_values().collect();

    let mut survivors = Vec::with_capacity(winners.len());
    let mut duplicates = Vec::new();
    for (idx, message) in group.into_iter().enumerate() {
        if winners.contains(&idx) {
            survivors.push(message);
        } else {
            duplicates.push(message);
        }
    }
    (survivors, duplicates)
}
