//! Maintenance tunables
//!
//! Built once at startup (the service maps its config file into this) and
//! handed to the reporter and maintainer by reference.

use std::time::Duration;

use token_auth::{DEFAULT_EXPIRY_BUFFER, DEFAULT_REFRESH_COOLDOWN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceSettings {
    /// Active accounts below this count is a shortfall.
    pub min_pool_size: u64,
    /// Active accounts above this count is over capacity.
    pub max_pool_size: u64,
    /// Sleep between maintenance cycles.
    pub cycle_interval: Duration,
    /// Minimum time between two refreshes of one account.
    pub refresh_cooldown: Duration,
    /// Tokens expiring within this window count as expired.
    pub expiry_buffer: Duration,
    /// Accounts with fewer remaining requests are retired.
    pub min_quota_threshold: i64,
    /// Pause between two accounts within a verification pass.
    pub pacing_delay: Duration,
    /// Purge runs on every cycle number divisible by this.
    pub purge_every_cycles: u64,
    /// Retention for the in-loop purge.
    pub cycle_retention_days: u32,
    /// Retention for an operator-requested purge.
    pub manual_retention_days: u32,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            min_pool_size: 25,
            max_pool_size: 60,
            cycle_interval: Duration::from_secs(120),
            refresh_cooldown: DEFAULT_REFRESH_COOLDOWN,
            expiry_buffer: DEFAULT_EXPIRY_BUFFER,
            min_quota_threshold: 10,
            pacing_delay: Duration::from_secs(1),
            purge_every_cycles: 10,
            cycle_retention_days: 7,
            manual_retention_days: 30,
        }
    }
}
