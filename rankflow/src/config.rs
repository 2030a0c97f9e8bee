//! Configuration for the resilience layer and result assembly.
//!
//! Every field has a serde default, so a partial JSON document (or none at
//! all) yields a usable configuration. Call [`RankflowConfig::validate`]
//! before wiring components together; the orchestrator builder does this
//! for you.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Converts a seconds setting, rejecting values no timer can represent.
fn duration_setting(field: &'static str, expected: &'static str, seconds: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|d| Instant::now().checked_add(*d).is_some())
        .ok_or_else(|| ConfigError::out_of_range(field, expected, seconds))
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankflowConfig {
    /// Health registry settings.
    #[serde(default)]
    pub health: HealthConfig,
    /// Circuit breaker settings.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Stage execution settings.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Result assembly settings.
    #[serde(default)]
    pub assembler: AssemblerConfig,
}

impl RankflowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Sets the health settings.
    #[must_use]
    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// Sets the breaker settings.
    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Sets the executor settings.
    #[must_use]
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Sets the assembler settings.
    #[must_use]
    pub fn with_assembler(mut self, assembler: AssemblerConfig) -> Self {
        self.assembler = assembler;
        self
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.health.validate()?;
        self.breaker.validate()?;
        self.executor.validate()?;
        self.assembler.validate()
    }
}

/// Health registry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// EMA smoothing factor in `(0, 1]`.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Error rate above which a service is no longer healthy.
    #[serde(default = "default_failover_threshold")]
    pub failover_threshold: f64,
    /// Interval between heartbeat sweeps in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: f64,
}

fn default_alpha() -> f64 {
    0.3
}

fn default_failover_threshold() -> f64 {
    0.2
}

fn default_sweep_interval() -> f64 {
    30.0
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            failover_threshold: default_failover_threshold(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl HealthConfig {
    /// Sets the smoothing factor.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Sets the failover threshold.
    #[must_use]
    pub fn with_failover_threshold(mut self, threshold: f64) -> Self {
        self.failover_threshold = threshold;
        self
    }

    /// Sets the sweep interval.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_seconds = interval.as_secs_f64();
        self
    }

    /// Sweep interval as a duration. Unvalidated values fall back to the
    /// default.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.sweep_interval_seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_sweep_interval()))
    }

    /// Heartbeat age after which the sweep marks a service failed.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.sweep_interval().saturating_mul(2)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        const FIELD: &str = "health.sweep_interval_seconds";
        const EXPECTED: &str = "a positive number of seconds a timer can represent";

        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConfigError::out_of_range("health.alpha", "in (0, 1]", self.alpha));
        }
        if !(self.failover_threshold > 0.0 && self.failover_threshold <= 1.0) {
            return Err(ConfigError::out_of_range(
                "health.failover_threshold",
                "in (0, 1]",
                self.failover_threshold,
            ));
        }
        let interval = duration_setting(FIELD, EXPECTED, self.sweep_interval_seconds)?;
        if interval.is_zero() {
            return Err(ConfigError::out_of_range(FIELD, EXPECTED, self.sweep_interval_seconds));
        }
        interval
            .checked_mul(2)
            .filter(|stale| Instant::now().checked_add(*stale).is_some())
            .map(|_| ())
            .ok_or_else(|| ConfigError::out_of_range(FIELD, EXPECTED, self.sweep_interval_seconds))
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// When false every call passes and no breaker ever opens.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Consecutive failures that open a closed breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds an open breaker waits before admitting a probe.
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_seconds: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> f64 {
    30.0
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout(),
        }
    }
}

impl BreakerConfig {
    /// A configuration whose breakers never open.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the recovery timeout.
    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Recovery timeout as a duration. Unvalidated values fall back to the
    /// default.
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.recovery_timeout_seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_recovery_timeout()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::out_of_range(
                "breaker.failure_threshold",
                "at least 1",
                self.failure_threshold,
            ));
        }
        duration_setting(
            "breaker.recovery_timeout_seconds",
            "a non-negative number of seconds a timer can represent",
            self.recovery_timeout_seconds,
        )
        .map(|_| ())
    }
}

/// Stage execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum pipeline runs executing at once; further submissions wait.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

fn default_worker_pool_size() -> usize {
    8
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
        }
    }
}

impl ExecutorConfig {
    /// Sets the worker pool size.
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 || self.worker_pool_size > Semaphore::MAX_PERMITS {
            return Err(ConfigError::out_of_range(
                "executor.worker_pool_size",
                "between 1 and the semaphore permit limit",
                self.worker_pool_size,
            ));
        }
        Ok(())
    }
}

/// Result assembly settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Truncate the ranked list to this many items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

impl AssemblerConfig {
    /// Sets the result cap.
    #[must_use]
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_results == Some(0) {
            return Err(ConfigError::out_of_range(
                "assembler.max_results",
                "at least 1 when set",
                0,
            ));
        }
        Ok(())
    }
}
