//! Engine configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default change-tracking poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default number of consecutive failed ticks before a poller stops itself.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Default cache entry time-to-live in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 30;

/// Default interval between maintenance passes in seconds.
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 60;

/// Configuration shared by every poller and the cache layer.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between change-tracking polls.
    pub poll_interval: Duration,

    /// Consecutive tick failures tolerated before a poller self-stops.
    pub max_consecutive_failures: u32,

    /// TTL applied by cache-aside reads that don't specify one.
    pub default_cache_ttl: Duration,

    /// Whether the cache layer talks to its backing store at all.
    pub cache_enabled: bool,

    /// Interval between change-log truncation and cache expiry sweeps.
    pub maintenance_interval: Duration,
}

impl EngineConfig {
    /// Create a configuration with the default values.
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            default_cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cache_enabled: true,
            maintenance_interval: Duration::from_secs(DEFAULT_MAINTENANCE_INTERVAL_SECS),
        }
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the failure ceiling.
    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Set the default cache TTL.
    pub fn with_default_cache_ttl(mut self, ttl: Duration) -> Self {
        self.default_cache_ttl = ttl;
        self
    }

    /// Set the maintenance interval.
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Disable the cache layer.
    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    /// Reject values the poller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be greater than zero".into()));
        }
        if self.maintenance_interval.is_zero() {
            return Err(Error::Config(
                "maintenance interval must be greater than zero".into(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::Config(
                "max consecutive failures must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
