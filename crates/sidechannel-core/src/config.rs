//! Top-level configuration: TOML file plus `SIDECHANNEL_*` environment overrides.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchSettings;
use crate::domain::error::{Result, SidechannelError};
use crate::retention::RetentionConfig;
use crate::store::StoreConfig;

pub const ENV_MAX_PER_THREAD: &str = "SIDECHANNEL_MAX_PER_THREAD";
pub const ENV_DEFAULT_TTL_STEPS: &str = "SIDECHANNEL_DEFAULT_TTL_STEPS";
pub const ENV_MAX_RETRIES: &str = "SIDECHANNEL_MAX_RETRIES";
pub const ENV_BACKOFF_BASE_MS: &str = "SIDECHANNEL_BACKOFF_BASE_MS";

/// Everything a driving loop needs to build a store, engine, and coordinator.
///
/// ```toml
/// [store]
/// max_per_thread = 20
/// default_ttl_steps = 3
///
/// [dispatch]
/// max_retries = 1
/// backoff_base_ms = 100
///
/// [retention]
/// global_cap = 8
///
/// [[retention.policies]]
/// category = "warning"
/// max_count = 3
/// dedup = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidechannelConfig {
    pub store: StoreConfig,
    pub dispatch: DispatchSettings,
    pub retention: RetentionConfig,
}

impl SidechannelConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Read a TOML file. Does not apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Unset keys are left alone;
    /// unparsable values are configuration errors.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = parse_override(&lookup, ENV_MAX_PER_THREAD)? {
            self.store.max_per_thread = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_DEFAULT_TTL_STEPS)? {
            self.store.default_ttl_steps = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_MAX_RETRIES)? {
            self.dispatch.max_retries = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_BACKOFF_BASE_MS)? {
            self.dispatch.backoff_base_ms = v;
        }
        Ok(())
    }

    /// Checks the store limits and retention policies.
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.retention.build()?;
        Ok(())
    }
}

fn parse_override<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            SidechannelError::InvalidConfig(format!("{key}: cannot parse {raw:?}"))
        }),
    }
}
