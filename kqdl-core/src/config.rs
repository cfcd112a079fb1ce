//! Loader configuration, stored as TOML.
//!
//! Every key is optional; a missing file section falls back to defaults.
//!
//! ```toml
//! cache_dir = "data/cache"
//! workers = 4
//! on_fetch_error = "skip_and_record"
//! field_conflicts = "reject"
//! trading_days_only = true
//!
//! [krx]
//! timeout_secs = 30
//! max_retries = 3
//! ```

use crate::data::reader::{FetchFailurePolicy, FetchOptions};
use crate::error::{LoaderError, Result};
use crate::registry::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound for `krx.max_retries`.
pub const MAX_RETRIES: u32 = 10;

/// Connection settings for the KRX data portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KrxConfig {
    pub base_url: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// First retry delay; doubles on every further attempt.
    pub base_delay_ms: u64,
    pub breaker_cooldown_secs: u64,
    pub breaker_failure_threshold: u32,
}

impl Default for KrxConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.krx.co.kr".into(),
            timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 500,
            breaker_cooldown_secs: 600,
            breaker_failure_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Root of the Parquet snapshot cache; `None` disables caching.
    pub cache_dir: Option<PathBuf>,
    /// Concurrent per-date fetches.
    pub workers: usize,
    pub on_fetch_error: FetchFailurePolicy,
    pub field_conflicts: ConflictPolicy,
    /// Drop non-trading days from the range before fetching.
    pub trading_days_only: bool,
    pub krx: KrxConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_dir: Some(PathBuf::from("data/cache")),
            workers: 4,
            on_fetch_error: FetchFailurePolicy::FailFast,
            field_conflicts: ConflictPolicy::Reject,
            trading_days_only: false,
            krx: KrxConfig::default(),
        }
    }
}

impl LoaderConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LoaderError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| LoaderError::Config(format!("parse loader TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LoaderError::Config(format!("serialize config: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LoaderError::Config("workers must be at least 1".into()));
        }
        if self.krx.timeout_secs == 0 {
            return Err(LoaderError::Config("krx.timeout_secs must be positive".into()));
        }
        if self.krx.base_url.trim().is_empty() {
            return Err(LoaderError::Config("krx.base_url is empty".into()));
        }
        if self.krx.max_retries > MAX_RETRIES {
            return Err(LoaderError::Config(format!(
                "krx.max_retries must be at most {MAX_RETRIES}"
            )));
        }
        if self.krx.breaker_failure_threshold == 0 {
            return Err(LoaderError::Config(
                "krx.breaker_failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            workers: self.workers,
            on_fetch_error: self.on_fetch_error,
        }
    }
}
