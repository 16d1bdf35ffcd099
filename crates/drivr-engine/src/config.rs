//! Engine configuration.
//!
//! Loaded from `drivr.toml` (when present) and overridden by environment
//! variables with the `DRIVR` prefix and `__` as the section separator, e.g.
//! `DRIVR__CACHE__MAX_ENTRIES=500` or `DRIVR__AUTH__SESSION__TTL=30m`.
//!
//! ```toml
//! [cache]
//! short_ttl = "5m"
//! medium_ttl = "15m"
//! long_ttl = "2h"
//!
//! [throttle]
//! high_sessions = 50
//! low_sessions = 35
//! cooldown = "2m"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use drivr_auth::AuthConfig;
use drivr_core::{CurrencyPolicy, to_time_duration};
use serde::{Deserialize, Serialize};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "drivr.toml";

/// Default environment variable prefix.
pub const ENV_PREFIX: &str = "DRIVR";

/// Longest accepted value for any duration setting (ten years).
pub const MAX_DURATION: Duration = Duration::from_secs(10 * 365 * 86_400);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Session and credential policy.
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
    pub throttle: ThrottleConfig,
    pub currency: CurrencyConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Read cache configuration. TTLs are per key class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "humantime_serde")]
    pub short_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub medium_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub long_ttl: Duration,

    /// Entry count that triggers eviction of the oldest quarter.
    pub max_entries: usize,

    /// Upper bound on how long a caller waits for a shared in-flight load.
    /// Must cover [`UpstreamConfig::call_budget`], or callers give up while
    /// the retry is still running.
    #[serde(with = "humantime_serde")]
    pub load_wait_timeout: Duration,

    /// How long an expired entry is kept for callers that accept stale data.
    #[serde(with = "humantime_serde")]
    pub stale_grace: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            short_ttl: Duration::from_secs(5 * 60),
            medium_ttl: Duration::from_secs(15 * 60),
            long_ttl: Duration::from_secs(2 * 3600),
            max_entries: 200,
            load_wait_timeout: Duration::from_secs(25),
            stale_grace: Duration::from_secs(3600),
        }
    }
}

/// Upstream data source call policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Per-call timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Pause before the single retry of a failed call.
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl UpstreamConfig {
    /// Worst case for one read: a timed-out call, the backoff, and the retry.
    pub fn call_budget(&self) -> Duration {
        self.timeout
            .saturating_mul(2)
            .saturating_add(self.retry_backoff)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Admission control and throttle mode thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Active sessions at which throttle mode turns on.
    pub high_sessions: usize,

    /// Requests per window at which throttle mode turns on.
    pub burst_requests: usize,

    /// Active sessions that must not be reached before throttle mode turns off.
    pub low_sessions: usize,

    /// Requests per window that must not be reached before throttle mode
    /// turns off.
    pub low_requests: usize,

    /// Trailing window for request counting.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// How long load must stay low before throttle mode turns off.
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,

    /// Requests per window one client may make in any mode.
    pub per_client_limit: usize,

    /// Concurrent requests per identity while throttled.
    pub per_identity_concurrency: usize,

    /// Concurrent requests overall while throttled.
    pub global_concurrency: usize,

    /// Backoff suggested to throttled callers.
    #[serde(with = "humantime_serde")]
    pub retry_after: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            high_sessions: 50,
            burst_requests: 300,
            low_sessions: 35,
            low_requests: 150,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(120),
            per_client_limit: 120,
            per_identity_concurrency: 2,
            global_concurrency: 16,
            retry_after: Duration::from_secs(2),
        }
    }
}

/// Currency rule parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrencyConfig {
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    pub requirement_km: f64,

    #[serde(with = "humantime_serde")]
    pub warning_horizon: Duration,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(90 * 86_400),
            requirement_km: 2.0,
            warning_horizon: Duration::from_secs(7 * 86_400),
        }
    }
}

impl CurrencyConfig {
    pub fn policy(&self) -> CurrencyPolicy {
        CurrencyPolicy {
            window: to_time_duration(self.window),
            requirement_km: self.requirement_km,
            warning_horizon: to_time_duration(self.warning_horizon),
        }
    }
}

/// Local file locations used by the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub credentials_path: PathBuf,
    pub backup_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("data/credentials.json"),
            backup_dir: PathBuf::from("data/backups"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The sources could not be read or merged.
    #[error("config build error: {0}")]
    Build(String),

    /// The merged configuration does not deserialize.
    #[error("config deserialize error: {0}")]
    Deserialize(String),

    /// A value is out of range.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<drivr_auth::ConfigError> for ConfigError {
    fn from(err: drivr_auth::ConfigError) -> Self {
        Self::InvalidValue(err.to_string())
    }
}

impl AppConfig {
    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.validate()?;

        let cache = &self.cache;
        if cache.short_ttl.is_zero() || cache.medium_ttl.is_zero() || cache.long_ttl.is_zero() {
            return Err(ConfigError::InvalidValue("cache TTLs must be > 0".into()));
        }
        if cache.max_entries < 4 {
            return Err(ConfigError::InvalidValue(
                "cache.max_entries must be >= 4".into(),
            ));
        }
        if self.upstream.timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "upstream.timeout must be > 0".into(),
            ));
        }
        let budget = self.upstream.call_budget();
        if cache.load_wait_timeout < budget {
            return Err(ConfigError::InvalidValue(format!(
                "cache.load_wait_timeout must be >= {budget:?} (twice upstream.timeout plus upstream.retry_backoff)"
            )));
        }

        let t = &self.throttle;
        if t.low_sessions > t.high_sessions || t.low_requests > t.burst_requests {
            return Err(ConfigError::InvalidValue(
                "throttle low-water marks must not exceed high-water marks".into(),
            ));
        }
        if t.window.is_zero() {
            return Err(ConfigError::InvalidValue(
                "throttle.window must be > 0".into(),
            ));
        }
        if t.per_client_limit == 0 || t.per_identity_concurrency == 0 || t.global_concurrency == 0
        {
            return Err(ConfigError::InvalidValue(
                "throttle limits must be > 0".into(),
            ));
        }

        let c = &self.currency;
        if c.window.is_zero() || !c.requirement_km.is_finite() || c.requirement_km <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "currency window and requirement_km must be > 0".into(),
            ));
        }

        self.check_duration_bounds()?;

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::InvalidValue(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }

        Ok(())
    }
}

impl AppConfig {
    fn check_duration_bounds(&self) -> Result<(), ConfigError> {
        let durations = [
            ("auth.session.ttl", self.auth.session.ttl),
            ("auth.session.sweep_interval", self.auth.session.sweep_interval),
            ("cache.short_ttl", self.cache.short_ttl),
            ("cache.medium_ttl", self.cache.medium_ttl),
            ("cache.long_ttl", self.cache.long_ttl),
            ("cache.load_wait_timeout", self.cache.load_wait_timeout),
            ("cache.stale_grace", self.cache.stale_grace),
            ("upstream.timeout", self.upstream.timeout),
            ("upstream.retry_backoff", self.upstream.retry_backoff),
            ("throttle.window", self.throttle.window),
            ("throttle.cooldown", self.throttle.cooldown),
            ("throttle.retry_after", self.throttle.retry_after),
            ("currency.window", self.currency.window),
            ("currency.warning_horizon", self.currency.warning_horizon),
        ];
        match durations.iter().find(|(_, d)| *d > MAX_DURATION) {
            Some((name, _)) => Err(ConfigError::InvalidValue(format!(
                "{name} must be at most ten years"
            ))),
            None => Ok(()),
        }
    }
}

pub mod loader {
    use super::*;
    use config::{Config, Environment, File};

    /// Load from `path` (or `drivr.toml` in the working directory) plus
    /// `DRIVR__*` environment overrides.
    pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
        load_config_with_prefix(path, ENV_PREFIX)
    }

    /// Like [`load_config`] with a custom environment prefix.
    pub fn load_config_with_prefix(
        path: Option<&Path>,
        env_prefix: &str,
    ) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .try_parsing(true)
                .separator("__"),
        );

        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Build(e.to_string()))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        merged.validate()?;
        Ok(merged)
    }
}
