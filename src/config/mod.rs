//! Engine configuration models
//!
//! Plain serde structs with defaulted fields. Loading them from files or the
//! environment is the host's concern; the engine only consumes the resolved
//! values.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_max_global_concurrency() -> usize {
    10
}
fn default_max_concurrent_batches() -> usize {
    8
}
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_cache_max_entries() -> usize {
    10000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    30000
}
fn default_true() -> bool {
    true
}
fn default_max_batch_size() -> usize {
    10000
}
fn default_batch_concurrency() -> usize {
    5
}
fn default_batch_timeout_secs() -> u64 {
    3600
}
fn default_request_timeout_secs() -> u64 {
    60
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduler and admission settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Result cache settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Retry and backoff settings
    #[serde(default)]
    pub retry: RetryConfig,
    /// Submission and dispatch limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Global cap on concurrently executing sub-requests
    #[serde(default = "default_max_global_concurrency")]
    pub max_global_concurrency: usize,
    /// Cap on concurrently admitted batches
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    /// Scheduler tick interval (milliseconds); admissions also run
    /// event-driven on submit and finalize
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_global_concurrency: default_max_global_concurrency(),
            max_concurrent_batches: default_max_concurrent_batches(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Tick interval as a `Duration`
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cache entries (seconds)
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Maximum number of entries; oldest entries are evicted on overflow
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

impl CacheConfig {
    /// Entry TTL as a `Duration`
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Retry and backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum total attempts per sub-request (initial call included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff delay (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Exponential backoff multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Backoff delay cap (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Add up to 10% uniform random jitter to each delay
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_true(),
        }
    }
}

/// Submission and dispatch limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of sub-requests per batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Default per-batch concurrency when the submitter does not choose one
    #[serde(default = "default_batch_concurrency")]
    pub default_batch_concurrency: usize,
    /// Default overall batch timeout (seconds)
    #[serde(default = "default_batch_timeout_secs")]
    pub default_batch_timeout_secs: u64,
    /// Timeout for a single executor call (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            default_batch_concurrency: default_batch_concurrency(),
            default_batch_timeout_secs: default_batch_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl LimitsConfig {
    /// Executor call timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.max_global_concurrency, 10);
        assert_eq!(config.scheduler.max_concurrent_batches, 8);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.cache.max_entries, 10000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30000);
        assert!(config.retry.jitter);
        assert_eq!(config.limits.default_batch_concurrency, 5);
    }

    #[test]
    fn test_config_deserialization_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.limits.max_batch_size, 10000);
    }

    #[test]
    fn test_config_deserialization_partial() {
        let json = r#"{"retry": {"max_attempts": 5}, "cache": {"ttl_secs": 60}}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.max_entries, 10000);
    }

    #[test]
    fn test_duration_helpers() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(config.limits.request_timeout(), Duration::from_secs(60));
    }
}
