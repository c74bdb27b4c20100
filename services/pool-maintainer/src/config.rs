//! Configuration types and loading
//!
//! Every section is optional and falls back to built-in defaults; a missing
//! config file means "all defaults". Refresh API keys are loaded from the
//! REFRESH_API_KEYS env var (comma-separated) or `refresh.api_keys_file`,
//! never stored in the TOML directly to avoid leaking secrets.

use account_pool::MaintenanceSettings;
use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_COOLDOWN_HOURS: u64 = 24 * 365;
const MAX_EXPIRY_BUFFER_MINUTES: u64 = 24 * 60;
const MAX_RETENTION_DAYS: u64 = 100 * 365;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pool: PoolConfig,
    pub maintenance: MaintenanceConfig,
    pub storage: StorageConfig,
    pub refresh: RefreshConfig,
    pub quota: QuotaConfig,
    pub http: HttpConfig,
    pub admin: AdminConfig,
}

/// Pool size bounds
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_size: u64,
    pub max_size: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 25,
            max_size: 60,
        }
    }
}

/// Maintenance loop cadence and thresholds
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub cycle_interval_secs: u64,
    pub refresh_cooldown_hours: u64,
    pub min_quota_threshold: i64,
    pub pacing_delay_ms: u64,
    pub purge_every_cycles: u64,
    pub cycle_retention_days: u32,
    pub manual_retention_days: u32,
    pub expiry_buffer_minutes: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 120,
            refresh_cooldown_hours: 1,
            min_quota_threshold: 10,
            pacing_delay_ms: 1000,
            purge_every_cycles: 10,
            cycle_retention_days: 7,
            manual_retention_days: 30,
            expiry_buffer_minutes: 10,
        }
    }
}

/// Account database location
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("warp_accounts.db"),
            timeout_secs: 10,
        }
    }
}

/// Token refresh endpoint settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    /// File with one API key per line (alternative to REFRESH_API_KEYS env var)
    pub api_keys_file: Option<PathBuf>,
    #[serde(skip)]
    pub api_keys: Vec<Secret<String>>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            endpoint: token_auth::REFRESH_ENDPOINT.to_string(),
            timeout_secs: token_auth::DEFAULT_REFRESH_TIMEOUT.as_secs(),
            api_keys_file: None,
            api_keys: Vec::new(),
        }
    }
}

/// Quota endpoint settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            endpoint: token_auth::QUOTA_ENDPOINT.to_string(),
            timeout_secs: 45,
        }
    }
}

/// Outbound HTTP client settings shared by both upstreams
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            user_agent: String::from("Mozilla/5.0"),
        }
    }
}

impl HttpConfig {
    /// Build the shared outbound client.
    pub fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().user_agent(self.user_agent.as_str());
        if let Some(proxy) = self.proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        builder.build()
    }
}

/// Admin listener (health + metrics). Disabled when `listen_addr` is unset.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub listen_addr: Option<SocketAddr>,
    pub max_connections: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            max_connections: 16,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file (defaults if it does not exist),
    /// then resolve API keys and validate.
    ///
    /// API key resolution order:
    /// 1. REFRESH_API_KEYS env var
    /// 2. api_keys_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&contents)?
        } else {
            Config::default()
        };

        config.refresh.api_keys = resolve_api_keys(config.refresh.api_keys_file.as_deref())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        for (name, url) in [
            ("refresh.endpoint", &self.refresh.endpoint),
            ("quota.endpoint", &self.quota.endpoint),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        for (name, value) in [
            ("maintenance.cycle_interval_secs", self.maintenance.cycle_interval_secs),
            ("maintenance.refresh_cooldown_hours", self.maintenance.refresh_cooldown_hours),
            ("maintenance.purge_every_cycles", self.maintenance.purge_every_cycles),
            ("storage.timeout_secs", self.storage.timeout_secs),
            ("refresh.timeout_secs", self.refresh.timeout_secs),
            ("quota.timeout_secs", self.quota.timeout_secs),
            ("admin.max_connections", self.admin.max_connections as u64),
        ] {
            if value == 0 {
                return Err(common::Error::Config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        for (name, value, max) in [
            (
                "maintenance.refresh_cooldown_hours",
                self.maintenance.refresh_cooldown_hours,
                MAX_COOLDOWN_HOURS,
            ),
            (
                "maintenance.expiry_buffer_minutes",
                self.maintenance.expiry_buffer_minutes,
                MAX_EXPIRY_BUFFER_MINUTES,
            ),
            (
                "maintenance.cycle_retention_days",
                u64::from(self.maintenance.cycle_retention_days),
                MAX_RETENTION_DAYS,
            ),
            (
                "maintenance.manual_retention_days",
                u64::from(self.maintenance.manual_retention_days),
                MAX_RETENTION_DAYS,
            ),
        ] {
            if value > max {
                return Err(common::Error::Config(format!(
                    "{name} must be at most {max}, got: {value}"
                )));
            }
        }

        if self.pool.min_size > self.pool.max_size {
            return Err(common::Error::Config(format!(
                "pool.min_size ({}) must not exceed pool.max_size ({})",
                self.pool.min_size, self.pool.max_size
            )));
        }

        if self.refresh.api_keys.is_empty() {
            return Err(common::Error::Config(
                "no refresh API key configured: set REFRESH_API_KEYS or refresh.api_keys_file"
                    .into(),
            ));
        }

        Ok(())
    }

    /// Tunables handed to the maintainer and health reporter.
    pub fn settings(&self) -> MaintenanceSettings {
        let m = &self.maintenance;
        MaintenanceSettings {
            min_pool_size: self.pool.min_size,
            max_pool_size: self.pool.max_size,
            cycle_interval: Duration::from_secs(m.cycle_interval_secs),
            refresh_cooldown: Duration::from_secs(m.refresh_cooldown_hours.saturating_mul(3600)),
            expiry_buffer: Duration::from_secs(m.expiry_buffer_minutes.saturating_mul(60)),
            min_quota_threshold: m.min_quota_threshold,
            pacing_delay: Duration::from_millis(m.pacing_delay_ms),
            purge_every_cycles: m.purge_every_cycles,
            cycle_retention_days: m.cycle_retention_days,
            manual_retention_days: m.manual_retention_days,
        }
    }

    /// Resolve config file path from the CONFIG_PATH env var.
    pub fn resolve_path() -> PathBuf {
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("pool-maintainer.toml")
    }
}

/// Split a comma- or newline-separated key list, dropping blanks.
fn parse_keys(raw: &str) -> Vec<Secret<String>> {
    raw.split([',', '\n'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(Secret::from)
        .collect()
}

fn resolve_api_keys(keys_file: Option<&Path>) -> common::Result<Vec<Secret<String>>> {
    if let Ok(keys) = std::env::var("REFRESH_API_KEYS") {
        let keys = parse_keys(&keys);
        if !keys.is_empty() {
            return Ok(keys);
        }
    }
    match keys_file {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read api_keys_file {}: {e}",
                    path.display()
                ))
            })?;
            Ok(parse_keys(&contents))
        }
        None => Ok(Vec::new()),
    }
}
