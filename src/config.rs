use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Scheduler-side rate limit: at most `rate` runs per `interval_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub rate: u32,
    pub interval_ms: u64,
}

impl RateLimit {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 300_000,
        }
    }
}

/// Tunables for the contact operation queue. Every field has a default, so
/// a config file only needs to list what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    /// Minimum spacing between identity-class calls inside this process.
    pub identity_rate_limit_ms: u64,
    pub identity_bucket: RateLimit,
    pub update_bucket: RateLimit,
    /// A cached token must outlive `now` by at least this much to be used.
    pub token_safety_margin_secs: i64,
    pub max_named_user_id_length: usize,
    pub locale: String,
    pub retry: RetryConfig,
    pub verified_contact_id_max_age_secs: i64,
    pub foreground_resolve_interval_secs: i64,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            identity_rate_limit_ms: 5_000,
            identity_bucket: RateLimit {
                rate: 1,
                interval_ms: 5_000,
            },
            update_bucket: RateLimit {
                rate: 1,
                interval_ms: 500,
            },
            token_safety_margin_secs: 30,
            max_named_user_id_length: 128,
            locale: "en-US".to_string(),
            retry: RetryConfig::default(),
            verified_contact_id_max_age_secs: 600,
            foreground_resolve_interval_secs: 86_400,
        }
    }
}

impl ContactConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn identity_rate_limit(&self) -> Duration {
        Duration::from_millis(self.identity_rate_limit_ms)
    }
}
