//! Engine tuning parameters.

use std::time::Duration;

/// Tuning parameters for the shared-object registry.
#[derive(Debug, Clone)]
pub struct AccessCacheConfig {
    /// How long an idle, expirable entry survives before disposal.
    pub expiry_window: Duration,
    /// Wakeup deadlines are rounded up to this boundary so near-simultaneous
    /// expirations coalesce into one timer fire.
    pub timer_granularity: Duration,
}

impl Default for AccessCacheConfig {
    fn default() -> Self {
        Self {
            expiry_window: Duration::from_secs(120),
            timer_granularity: Duration::from_secs(16),
        }
    }
}

/// Manager-level configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Registry tuning.
    pub access_cache: AccessCacheConfig,
    /// Bound on the wait for outstanding transport work during shutdown.
    pub shutdown_timeout: Duration,
}

impl ManagerConfig {
    /// Defaults: 120 s expiry window, 16 s timer granularity, 5 s shutdown
    /// bound.
    pub fn new() -> Self {
        Self {
            access_cache: AccessCacheConfig::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}
