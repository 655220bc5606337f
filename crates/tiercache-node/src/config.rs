use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::CachePolicy;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Redis configuration (shared tier, locks, invalidation bus)
    #[serde(default)]
    pub redis: RedisConfig,
    /// Cache TTLs and budgets
    #[serde(default)]
    pub cache: CacheConfig,
    /// Existence filter sizing
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default derived via field defaults

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Redis validations
        if self.redis.enabled && self.redis.url.trim().is_empty() {
            return Err("redis.enabled=true requires redis.url".into());
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        // Cache validations
        let c = &self.cache;
        if c.entity.trim().is_empty() || c.schema_version.trim().is_empty() {
            return Err("cache.entity and cache.schema_version must be non-empty".into());
        }
        if c.entity.contains(':') || c.schema_version.contains(':') {
            return Err("cache.entity and cache.schema_version must not contain ':'".into());
        }
        if c.local_max_entries == 0 {
            return Err("cache.local_max_entries must be > 0".into());
        }
        if c.local_ttl_secs == 0
            || c.logical_ttl_base_secs == 0
            || c.physical_ttl_secs == 0
            || c.negative_ttl_secs == 0
        {
            return Err("cache TTLs must be > 0".into());
        }
        if c.physical_ttl_secs < c.logical_ttl_base_secs + c.logical_ttl_jitter_secs {
            return Err(
                "cache.physical_ttl_secs must be >= logical_ttl_base_secs + logical_ttl_jitter_secs"
                    .into(),
            );
        }
        if c.load_lock_ttl_ms == 0 || c.refresh_lock_ttl_ms == 0 {
            return Err("cache lock TTLs must be > 0".into());
        }
        if c.max_background_tasks == 0 {
            return Err("cache.max_background_tasks must be > 0".into());
        }
        // Filter validations
        if self.filter.expected_items == 0 {
            return Err("filter.expected_items must be > 0".into());
        }
        let fpp = self.filter.false_positive_rate;
        if !(fpp > 0.0 && fpp < 1.0) {
            return Err("filter.false_positive_rate must be in (0, 1)".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Redis configuration for the cluster-shared components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (degrades to single-instance in-memory mode without it)
    /// Default: false
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Cache key layout, TTLs and timing budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entity namespace used as the key prefix
    #[serde(default = "default_entity")]
    pub entity: String,

    /// Schema version embedded in every key; bump to orphan old entries
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Local (L1) cache max entries
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: u64,

    /// Local (L1) physical TTL in seconds
    #[serde(default = "default_local_ttl_secs")]
    pub local_ttl_secs: u64,

    #[serde(default = "default_logical_ttl_base_secs")]
    pub logical_ttl_base_secs: u64,

    /// Random window added to the logical TTL to stagger expiry
    #[serde(default = "default_logical_ttl_jitter_secs")]
    pub logical_ttl_jitter_secs: u64,

    /// Shared (L2) physical TTL for positive entries
    #[serde(default = "default_physical_ttl_secs")]
    pub physical_ttl_secs: u64,

    /// TTL of negative markers in both tiers
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,

    #[serde(default = "default_load_lock_ttl_ms")]
    pub load_lock_ttl_ms: u64,

    #[serde(default = "default_refresh_lock_ttl_ms")]
    pub refresh_lock_ttl_ms: u64,

    #[serde(default = "default_lock_wait_backoff_ms")]
    pub lock_wait_backoff_ms: u64,

    /// Delay before the second invalidation round after a write
    #[serde(default = "default_double_delete_delay_ms")]
    pub double_delete_delay_ms: u64,

    /// Upper bound on concurrently running refresh/invalidation tasks
    #[serde(default = "default_max_background_tasks")]
    pub max_background_tasks: usize,
}

fn default_entity() -> String {
    "user".to_string()
}

fn default_schema_version() -> String {
    "v1".to_string()
}

fn default_local_max_entries() -> u64 {
    100_000
}

fn default_local_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_logical_ttl_base_secs() -> u64 {
    300
}

fn default_logical_ttl_jitter_secs() -> u64 {
    300
}

fn default_physical_ttl_secs() -> u64 {
    600 // 10 minutes
}

fn default_negative_ttl_secs() -> u64 {
    30
}

fn default_load_lock_ttl_ms() -> u64 {
    5_000
}

fn default_refresh_lock_ttl_ms() -> u64 {
    10_000
}

fn default_lock_wait_backoff_ms() -> u64 {
    50
}

fn default_double_delete_delay_ms() -> u64 {
    300
}

fn default_max_background_tasks() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entity: default_entity(),
            schema_version: default_schema_version(),
            local_max_entries: default_local_max_entries(),
            local_ttl_secs: default_local_ttl_secs(),
            logical_ttl_base_secs: default_logical_ttl_base_secs(),
            logical_ttl_jitter_secs: default_logical_ttl_jitter_secs(),
            physical_ttl_secs: default_physical_ttl_secs(),
            negative_ttl_secs: default_negative_ttl_secs(),
            load_lock_ttl_ms: default_load_lock_ttl_ms(),
            refresh_lock_ttl_ms: default_refresh_lock_ttl_ms(),
            lock_wait_backoff_ms: default_lock_wait_backoff_ms(),
            double_delete_delay_ms: default_double_delete_delay_ms(),
            max_background_tasks: default_max_background_tasks(),
        }
    }
}

impl From<&CacheConfig> for CachePolicy {
    fn from(c: &CacheConfig) -> Self {
        Self {
            local_max_entries: c.local_max_entries,
            local_ttl: Duration::from_secs(c.local_ttl_secs),
            logical_ttl_base: Duration::from_secs(c.logical_ttl_base_secs),
            logical_ttl_jitter: Duration::from_secs(c.logical_ttl_jitter_secs),
            physical_ttl: Duration::from_secs(c.physical_ttl_secs),
            negative_ttl: Duration::from_secs(c.negative_ttl_secs),
            load_lock_ttl: Duration::from_millis(c.load_lock_ttl_ms),
            refresh_lock_ttl: Duration::from_millis(c.refresh_lock_ttl_ms),
            lock_wait_backoff: Duration::from_millis(c.lock_wait_backoff_ms),
            double_delete_delay: Duration::from_millis(c.double_delete_delay_ms),
            max_background_tasks: c.max_background_tasks,
        }
    }
}

/// Existence filter sizing (capacity and fpp tuned; rebuilt externally)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_expected_items")]
    pub expected_items: u64,

    #[serde(default = "default_false_positive_rate")]
    pub false_positive_rate: f64,
}

fn default_expected_items() -> u64 {
    10_000_000
}

fn default_false_positive_rate() -> f64 {
    0.01
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            expected_items: default_expected_items(),
            false_positive_rate: default_false_positive_rate(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                // Try default root-level file
                let default_path = PathBuf::from("tiercache.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., TIERCACHE__CACHE__NEGATIVE_TTL_SECS=10
        builder = builder.add_source(
            Environment::with_prefix("TIERCACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }
}
