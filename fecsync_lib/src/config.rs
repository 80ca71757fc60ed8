//! Run configuration, loaded from an optional TOML file.
//!
//! ```toml
//! [rate_limit]
//! max_requests_per_window = 900
//! window_secs = 3600
//!
//! [retry]
//! max_retries = 5
//! base_delay_ms = 30000
//!
//! [collector]
//! max_retry_passes = 2
//! save_interval = 10
//! ```
//!
//! Every key is optional; missing keys take the defaults shown above.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::openfec::client::MAX_PER_PAGE;
use crate::openfec::{RateLimiter, RetryPolicy};

/// Longest accepted rate-limit window (one week).
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 3600;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub max_requests_per_window: u64,
    pub window_secs: u64,
    /// Minimum spacing between requests. Unset spreads the budget evenly.
    pub min_interval_ms: Option<u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 900,
            window_secs: 3600,
            min_interval_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 30_000,
            multiplier: 2.0,
            max_jitter_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    /// Extra passes over failed items after the main pass.
    pub max_retry_passes: u32,
    /// Save the checkpoint after this many processed items.
    pub save_interval: usize,
    pub per_page: u32,
    /// Treat 4xx responses (other than 429) as permanent on first sight.
    pub client_errors_permanent: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_retry_passes: 2,
            save_interval: 10,
            per_page: MAX_PER_PAGE,
            client_errors_permanent: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub collector: CollectorConfig,
}

impl SyncConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.max_requests_per_window == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_requests_per_window must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_WINDOW_SECS).contains(&self.rate_limit.window_secs) {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.window_secs must be between 1 and {}, got {}",
                MAX_WINDOW_SECS, self.rate_limit.window_secs
            )));
        }
        if let Some(ms) = self.rate_limit.min_interval_ms {
            if ms > self.rate_limit.window_secs.saturating_mul(1000) {
                return Err(ConfigError::Invalid(format!(
                    "rate_limit.min_interval_ms must not exceed the window, got {}",
                    ms
                )));
            }
        }
        if !(self.retry.multiplier >= 1.0 && self.retry.multiplier.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be >= 1, got {}",
                self.retry.multiplier
            )));
        }
        if self.collector.save_interval == 0 {
            return Err(ConfigError::Invalid(
                "collector.save_interval must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_PER_PAGE).contains(&self.collector.per_page) {
            return Err(ConfigError::Invalid(format!(
                "collector.per_page must be between 1 and {}, got {}",
                MAX_PER_PAGE, self.collector.per_page
            )));
        }
        Ok(())
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        let window = Duration::from_secs(self.rate_limit.window_secs);
        match self.rate_limit.min_interval_ms {
            Some(ms) => RateLimiter::new(
                self.rate_limit.max_requests_per_window,
                window,
                Duration::from_millis(ms),
            ),
            None => RateLimiter::evenly_paced(self.rate_limit.max_requests_per_window, window),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.multiplier,
            max_jitter: Duration::from_millis(self.retry.max_jitter_ms),
        }
    }
}
