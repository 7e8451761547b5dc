//! Configuration Module
//!
//! Handles loading and validating service configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::KeyRange;
use crate::preload::{PreloadSettings, ResumeMode};
use crate::service::LookupSettings;
use crate::store::{PgConfig, RedisConfig, RetryPolicy};

/// Which store implementations the service runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local stores; nothing is shared between instances
    Memory,
    /// PostgreSQL durable store with a Redis cache
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" => Ok(StoreBackend::Postgres),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

/// Service configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Smallest valid student id
    pub key_min: i64,
    /// Largest valid student id
    pub key_max: i64,
    /// Rows per seed insert
    pub batch_size: usize,
    /// Rows per durable page read while warming
    pub page_size: usize,
    /// Parallel seed/warm workers
    pub worker_count: usize,
    /// Warm shards
    pub shard_count: usize,
    pub db_pool_size: usize,
    pub cache_pool_size: usize,
    pub pool_acquire_timeout: Duration,
    /// Deadline for single-key store calls
    pub call_timeout: Duration,
    /// Deadline for bulk store calls
    pub bulk_call_timeout: Duration,
    pub failure_tolerance: usize,
    pub negative_cache: bool,
    pub coalesce_misses: bool,
    pub warm_resume: ResumeMode,
    pub dataset_generation: String,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    pub store_backend: StoreBackend,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub redis_url: String,
    /// Generate and insert the dataset before warming
    pub seed_on_startup: bool,
    /// Warm the cache from this instance (otherwise only wait for the marker)
    pub warm_on_startup: bool,
    pub warm_max_attempts: u32,
    /// Interval between readiness probes and warm retries
    pub readiness_poll: Duration,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// Unset variables take their default; set but unparsable values are errors.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `KEY_MIN` / `KEY_MAX` - Valid student id range (default: 10000 / 683999)
    /// - `BATCH_SIZE` - Rows per seed insert (default: 5000)
    /// - `PAGE_SIZE` - Rows per warm page read (default: 1000)
    /// - `WORKER_COUNT` - Parallel seed/warm workers (default: 8)
    /// - `SHARD_COUNT` - Warm shards (default: 16)
    /// - `DB_POOL_SIZE` / `CACHE_POOL_SIZE` - Pool sizes (default: 16 / 32)
    /// - `POOL_ACQUIRE_TIMEOUT_MS` - Wait for a pooled connection (default: 2000)
    /// - `CALL_TIMEOUT_MS` - Single-key call deadline (default: 1000)
    /// - `BULK_CALL_TIMEOUT_MS` - Bulk call deadline (default: 30000)
    /// - `FAILURE_TOLERANCE` - Failed batches/shards accepted (default: 0)
    /// - `NEGATIVE_CACHE` - Cache durable misses (default: false)
    /// - `COALESCE_MISSES` - Collapse concurrent misses per key (default: false)
    /// - `WARM_RESUME` - `full` or `failed-only` (default: failed-only)
    /// - `DATASET_GENERATION` - Marker namespace (default: v1)
    /// - `RETRY_ATTEMPTS` / `RETRY_BACKOFF_MS` - Adapter retries (default: 3 / 50)
    /// - `STORE_BACKEND` - `memory` or `postgres` (default: memory)
    /// - `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD` - PostgreSQL connection
    /// - `REDIS_URL` - Redis connection (default: redis://127.0.0.1:6379)
    /// - `SEED_ON_STARTUP` / `WARM_ON_STARTUP` - Startup work (default: false / true)
    /// - `WARM_MAX_ATTEMPTS` - Warm attempts before waiting passively (default: 3)
    /// - `READINESS_POLL_MS` - Readiness poll interval (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a Config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Config::default();
        let num = |key: &str, default: u64| parse_var(&lookup, key, default);
        let ms = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(Duration::from_millis(parse_var(
                &lookup,
                key,
                default.as_millis() as u64,
            )?))
        };
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            server_port: parse_var(&lookup, "SERVER_PORT", d.server_port)?,
            key_min: parse_var(&lookup, "KEY_MIN", d.key_min)?,
            key_max: parse_var(&lookup, "KEY_MAX", d.key_max)?,
            batch_size: num("BATCH_SIZE", d.batch_size as u64)? as usize,
            page_size: num("PAGE_SIZE", d.page_size as u64)? as usize,
            worker_count: num("WORKER_COUNT", d.worker_count as u64)? as usize,
            shard_count: num("SHARD_COUNT", d.shard_count as u64)? as usize,
            db_pool_size: num("DB_POOL_SIZE", d.db_pool_size as u64)? as usize,
            cache_pool_size: num("CACHE_POOL_SIZE", d.cache_pool_size as u64)? as usize,
            pool_acquire_timeout: ms("POOL_ACQUIRE_TIMEOUT_MS", d.pool_acquire_timeout)?,
            call_timeout: ms("CALL_TIMEOUT_MS", d.call_timeout)?,
            bulk_call_timeout: ms("BULK_CALL_TIMEOUT_MS", d.bulk_call_timeout)?,
            failure_tolerance: num("FAILURE_TOLERANCE", d.failure_tolerance as u64)? as usize,
            negative_cache: parse_flag(&lookup, "NEGATIVE_CACHE", d.negative_cache)?,
            coalesce_misses: parse_flag(&lookup, "COALESCE_MISSES", d.coalesce_misses)?,
            warm_resume: parse_var(&lookup, "WARM_RESUME", d.warm_resume)?,
            dataset_generation: text("DATASET_GENERATION", &d.dataset_generation),
            retry_attempts: parse_var(&lookup, "RETRY_ATTEMPTS", d.retry_attempts)?,
            retry_backoff: ms("RETRY_BACKOFF_MS", d.retry_backoff)?,
            store_backend: parse_var(&lookup, "STORE_BACKEND", d.store_backend)?,
            db_host: text("DB_HOST", &d.db_host),
            db_port: parse_var(&lookup, "DB_PORT", d.db_port)?,
            db_name: text("DB_NAME", &d.db_name),
            db_user: text("DB_USER", &d.db_user),
            db_password: text("DB_PASSWORD", &d.db_password),
            redis_url: text("REDIS_URL", &d.redis_url),
            seed_on_startup: parse_flag(&lookup, "SEED_ON_STARTUP", d.seed_on_startup)?,
            warm_on_startup: parse_flag(&lookup, "WARM_ON_STARTUP", d.warm_on_startup)?,
            warm_max_attempts: parse_var(&lookup, "WARM_MAX_ATTEMPTS", d.warm_max_attempts)?,
            readiness_poll: ms("READINESS_POLL_MS", d.readiness_poll)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_min < 0 {
            return Err(ConfigError::InvalidValue {
                key: "KEY_MIN".to_string(),
                value: self.key_min.to_string(),
            });
        }
        if self.key_min > self.key_max {
            return Err(ConfigError::Invalid(format!(
                "KEY_MIN ({}) exceeds KEY_MAX ({})",
                self.key_min, self.key_max
            )));
        }
        let positive = [
            ("BATCH_SIZE", self.batch_size),
            ("PAGE_SIZE", self.page_size),
            ("WORKER_COUNT", self.worker_count),
            ("SHARD_COUNT", self.shard_count),
            ("DB_POOL_SIZE", self.db_pool_size),
            ("CACHE_POOL_SIZE", self.cache_pool_size),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: "0".to_string(),
                });
            }
        }
        if self.call_timeout.is_zero() || self.bulk_call_timeout.is_zero() {
            return Err(ConfigError::Invalid("call timeouts must be non-zero".to_string()));
        }
        if self.dataset_generation.is_empty() || self.dataset_generation.contains(':') {
            return Err(ConfigError::InvalidValue {
                key: "DATASET_GENERATION".to_string(),
                value: self.dataset_generation.clone(),
            });
        }
        Ok(())
    }

    pub fn key_range(&self) -> KeyRange {
        KeyRange::new(self.key_min, self.key_max)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_backoff)
    }

    pub fn lookup_settings(&self) -> LookupSettings {
        LookupSettings {
            key_range: self.key_range(),
            call_timeout: self.call_timeout,
            negative_cache: self.negative_cache,
            coalesce_misses: self.coalesce_misses,
        }
    }

    pub fn preload_settings(&self) -> PreloadSettings {
        PreloadSettings {
            key_range: self.key_range(),
            batch_size: self.batch_size,
            page_size: self.page_size,
            worker_count: self.worker_count,
            shard_count: self.shard_count,
            call_timeout: self.call_timeout,
            bulk_timeout: self.bulk_call_timeout,
            failure_tolerance: self.failure_tolerance,
            resume: self.warm_resume,
            generation: self.dataset_generation.clone(),
        }
    }

    pub fn pg_config(&self) -> PgConfig {
        PgConfig {
            host: self.db_host.clone(),
            port: self.db_port,
            dbname: self.db_name.clone(),
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            max_size: self.db_pool_size,
            acquire_timeout: self.pool_acquire_timeout,
        }
    }

    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig {
            url: self.redis_url.clone(),
            max_size: self.cache_pool_size,
            acquire_timeout: self.pool_acquire_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            key_min: 10_000,
            key_max: 683_999,
            batch_size: 5_000,
            page_size: 1_000,
            worker_count: 8,
            shard_count: 16,
            db_pool_size: 16,
            cache_pool_size: 32,
            pool_acquire_timeout: Duration::from_millis(2_000),
            call_timeout: Duration::from_millis(1_000),
            bulk_call_timeout: Duration::from_millis(30_000),
            failure_tolerance: 0,
            negative_cache: false,
            coalesce_misses: false,
            warm_resume: ResumeMode::FailedOnly,
            dataset_generation: "v1".to_string(),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(50),
            store_backend: StoreBackend::Memory,
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_name: "results".to_string(),
            db_user: "postgres".to_string(),
            db_password: String::new(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            seed_on_startup: false,
            warm_on_startup: true,
            warm_max_attempts: 3,
            readiness_poll: Duration::from_millis(1_000),
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: other.to_string(),
        }),
    }
}
