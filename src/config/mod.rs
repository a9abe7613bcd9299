//! # Dispatch Configuration
//!
//! Typed configuration for the dispatch core, loaded from an optional TOML file plus
//! environment overrides (see [`ConfigManager`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasker_dispatch::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let retries = manager.config().retry.max_retries;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/dispatch.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Retry interceptor settings
    pub retry: RetryConfig,
    /// Stale-while-revalidate cache settings
    pub cache: CacheConfig,
    /// Execution status table settings
    pub status: StatusConfig,
    /// Deferred dispatch scheduler settings
    pub scheduler: SchedulerConfig,
    /// Event fan-out settings
    pub events: EventsConfig,
}

impl DispatchConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.retry.validate()?;
        self.cache.validate()?;
        self.status.validate()?;
        if self.scheduler.cleanup_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.cleanup_interval_seconds",
                "0",
                "must be greater than 0",
            ));
        }
        if self.events.handler_timeout_ms == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "events.handler_timeout_ms",
                "0",
                "must be greater than 0 when set",
            ));
        }
        Ok(())
    }
}

/// Backoff and retry configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first failure
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            base_delay_ms: defaults::RETRY_BASE_DELAY.as_millis() as u64,
            max_delay_ms: defaults::RETRY_MAX_DELAY.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.base_delay_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_ms",
                "0",
                "must be greater than 0",
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.max_delay_ms",
                self.max_delay_ms.to_string(),
                "must be greater than or equal to retry.base_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Which cache store backs the query cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheProviderKind {
    #[default]
    Memory,
    None,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub provider: CacheProviderKind,
    pub default_ttl_seconds: u64,
    pub default_stale_seconds: u64,
    pub stale_while_revalidate: bool,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            provider: CacheProviderKind::Memory,
            default_ttl_seconds: defaults::CACHE_TTL.as_secs(),
            default_stale_seconds: defaults::CACHE_STALE_TIME.as_secs(),
            stale_while_revalidate: true,
            max_entries: defaults::CACHE_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn default_stale_time(&self) -> Duration {
        Duration::from_secs(self.default_stale_seconds)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.default_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.default_ttl_seconds",
                "0",
                "must be greater than 0",
            ));
        }
        if self.max_entries == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.max_entries",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusConfig {
    pub max_age_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub sweep_enabled: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: defaults::STATUS_MAX_AGE.as_secs(),
            sweep_interval_seconds: defaults::STATUS_SWEEP_INTERVAL.as_secs(),
            sweep_enabled: true,
        }
    }
}

impl StatusConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_age_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "status.max_age_seconds",
                "0",
                "must be greater than 0",
            ));
        }
        if self.sweep_enabled && self.sweep_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "status.sweep_interval_seconds",
                "0",
                "must be greater than 0 when the sweeper is enabled",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub cleanup_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: defaults::SCHEDULER_CLEANUP_INTERVAL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// When set, each event handler traversal is bounded by this timeout
    pub handler_timeout_ms: Option<u64>,
}

impl EventsConfig {
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DispatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay(), Duration::from_secs(1));
        assert_eq!(config.status.max_age(), Duration::from_secs(86_400));
        assert!(config.status.sweep_enabled);
        assert!(config.cache.stale_while_revalidate);
    }

    #[test]
    fn test_validation_rejects_bad_retry_bounds() {
        let mut config = DispatchConfig::default();
        config.retry.max_delay_ms = 10;
        assert!(config.validate().is_err());

        config.retry = RetryConfig {
            base_delay_ms: 0,
            ..RetryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_ttl_and_age() {
        let mut config = DispatchConfig::default();
        config.cache.default_ttl_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = DispatchConfig::default();
        config.status.max_age_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = DispatchConfig::default();
        config.events.handler_timeout_ms = Some(0);
        assert!(config.validate().is_err());
    }
}
