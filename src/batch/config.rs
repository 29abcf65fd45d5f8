//! Batch configuration.
//!
//! A [`BatchConfig`] is assembled from stage defaults, an optional YAML file
//! and command-line flags (in increasing priority), then validated before
//! anything is scheduled.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::retry::{RetryPolicy, DEFAULT_MAX_DELAY, DEFAULT_RATE_LIMIT_MULTIPLIER};
use crate::error::ConfigError;

/// Default interval between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Knobs for one batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Maximum number of items in flight.
    pub concurrency: usize,
    /// Attempts per item, including the first.
    pub max_attempts: u32,
    /// Base delay of the exponential backoff.
    pub base_delay: Duration,
    /// Extra backoff factor after a rate-limit response.
    pub rate_limit_multiplier: u32,
    /// Cap on a single backoff sleep.
    pub max_delay: Duration,
    /// Timeout of a single executor attempt.
    pub attempt_timeout: Duration,
    /// Dispatch at most this many pending items.
    pub limit: Option<usize>,
    /// Enumerate and filter only.
    pub dry_run: bool,
    /// Progress log interval; `None` disables the monitor.
    pub progress_interval: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            concurrency: 10,
            max_attempts: retry.max_attempts,
            base_delay: retry.base_delay,
            rate_limit_multiplier: DEFAULT_RATE_LIMIT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            attempt_timeout: Duration::from_secs(30),
            limit: None,
            dry_run: false,
            progress_interval: Some(DEFAULT_PROGRESS_INTERVAL),
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_progress_interval(mut self, interval: Option<Duration>) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be greater than 0"));
        }
        if self.attempt_timeout.is_zero() {
            return Err(invalid("attempt_timeout", "must be greater than 0"));
        }
        if self.rate_limit_multiplier == 0 {
            return Err(invalid("rate_limit_multiplier", "must be greater than 0"));
        }
        if self.max_delay < self.base_delay {
            return Err(invalid(
                "max_delay",
                "must not be smaller than the base delay",
            ));
        }
        if self.progress_interval.is_some_and(|i| i.is_zero()) {
            return Err(invalid("progress_interval", "must be greater than 0"));
        }
        Ok(())
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay)
            .with_rate_limit_multiplier(self.rate_limit_multiplier)
            .with_max_delay(self.max_delay)
            .with_attempt_timeout(Some(self.attempt_timeout))
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Partial batch settings, as read from a YAML file or the command line.
///
/// Every field is optional; unset fields keep the value they override.
///
/// ```yaml
/// concurrency: 20
/// max_attempts: 5
/// backoff_ms: 500
/// timeout_secs: 60
/// progress_secs: 0   # disable progress logging
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchSettings {
    pub concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub rate_limit_multiplier: Option<u32>,
    pub max_delay_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub limit: Option<usize>,
    pub progress_secs: Option<u64>,
}

impl BatchSettings {
    /// Reads settings from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Combines two settings; values set in `overrides` win.
    pub fn merge(self, overrides: BatchSettings) -> Self {
        Self {
            concurrency: overrides.concurrency.or(self.concurrency),
            max_attempts: overrides.max_attempts.or(self.max_attempts),
            backoff_ms: overrides.backoff_ms.or(self.backoff_ms),
            rate_limit_multiplier: overrides
                .rate_limit_multiplier
                .or(self.rate_limit_multiplier),
            max_delay_secs: overrides.max_delay_secs.or(self.max_delay_secs),
            timeout_secs: overrides.timeout_secs.or(self.timeout_secs),
            limit: overrides.limit.or(self.limit),
            progress_secs: overrides.progress_secs.or(self.progress_secs),
        }
    }

    /// Applies the set fields on top of `base`.
    pub fn apply(&self, mut base: BatchConfig) -> BatchConfig {
        if let Some(v) = self.concurrency {
            base.concurrency = v;
        }
        if let Some(v) = self.max_attempts {
            base.max_attempts = v;
        }
        if let Some(v) = self.backoff_ms {
            base.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.rate_limit_multiplier {
            base.rate_limit_multiplier = v;
        }
        if let Some(v) = self.max_delay_secs {
            base.max_delay = Duration::from_secs(v);
        }
        if let Some(v) = self.timeout_secs {
            base.attempt_timeout = Duration::from_secs(v);
        }
        if self.limit.is_some() {
            base.limit = self.limit;
        }
        if let Some(v) = self.progress_secs {
            base.progress_interval = (v > 0).then(|| Duration::from_secs(v));
        }
        base
    }
}
