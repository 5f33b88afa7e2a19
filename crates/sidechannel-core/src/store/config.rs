//! Limits governing a [`MessageStore`](super::MessageStore).

use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, SidechannelError};

/// Store limits. All windows are measured in steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Same-fingerprint messages sent within this many steps are duplicates.
    pub dedupe_window_steps: u64,
    /// Expiry applied when a candidate carries none.
    pub default_ttl_steps: u64,
    /// Hard per-thread message cap, enforced on every accepted send.
    pub max_per_thread: usize,
    /// Incorporated messages older than this many steps are collected by `gc`.
    pub incorporated_retention_steps: u64,
    /// Snapshots kept per thread.
    pub snapshot_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dedupe_window_steps: 5,
            default_ttl_steps: 10,
            max_per_thread: 50,
            incorporated_retention_steps: 20,
            snapshot_capacity: 20,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_per_thread == 0 {
            return Err(SidechannelError::InvalidConfig(
                "max_per_thread must be at least 1".to_string(),
            ));
        }
        if self.snapshot_capacity == 0 {
            return Err(SidechannelError::InvalidConfig(
                "snapshot_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
