//! Redis Cache
//!
//! Cache adapter over a deadpool-redis pool. Result entries are Redis hashes,
//! markers are plain string keys. Bulk writes go out as one pipeline; the
//! conditional writes run as server-side scripts invoked by hash.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{self, Script};
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};

use super::{Deadline, ResultCache, RetryPolicy, WriteMode};
use crate::error::{StoreError, StoreResult};
use crate::models::{record::ABSENT_FIELD, Fields};

/// Writes a hash only if the key is unused or holds a negative entry.
///
/// KEYS[1] = entry key, ARGV[1] = negative-entry field, ARGV[2..] = field/value pairs.
const HSET_IF_ABSENT: &str = r#"
local key = KEYS[1]
if redis.call('EXISTS', key) == 1 and redis.call('HEXISTS', key, ARGV[1]) == 0 then
    return 0
end
redis.call('DEL', key)
redis.call('HSET', key, unpack(ARGV, 2))
return 1
"#;

/// Writes a negative entry only if the key is unused.
///
/// KEYS[1] = entry key, ARGV[1] = negative-entry field.
const HSET_ABSENT_IF_VACANT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], '1')
return 1
"#;

// == Configuration ==
/// Connection pool configuration for the cache.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// Maximum pooled connections
    pub max_size: usize,
    /// How long a caller waits for a free connection
    pub acquire_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_size: 32,
            acquire_timeout: Duration::from_secs(2),
        }
    }
}

impl RedisConfig {
    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> StoreResult<Pool> {
        let mut cfg = Config::from_url(self.url.clone());
        let mut pool = PoolConfig::new(self.max_size);
        pool.timeouts.wait = Some(self.acquire_timeout);
        pool.timeouts.create = Some(self.acquire_timeout);
        pool.timeouts.recycle = Some(self.acquire_timeout);
        cfg.pool = Some(pool);

        cfg.create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Unavailable(format!("failed to create cache pool: {}", e)))
    }
}

// == Cache ==
/// Shared cache over Redis.
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
    retry: RetryPolicy,
    write_if_absent: Script,
    absent_if_vacant: Script,
}

impl RedisCache {
    pub fn new(pool: Pool, retry: RetryPolicy) -> Self {
        Self {
            pool,
            retry,
            write_if_absent: Script::new(HSET_IF_ABSENT),
            absent_if_vacant: Script::new(HSET_ABSENT_IF_VACANT),
        }
    }

    /// Creates the pool from configuration.
    pub fn from_config(config: &RedisConfig, retry: RetryPolicy) -> StoreResult<Self> {
        Ok(Self::new(config.create_pool()?, retry))
    }
}

/// Builds the pipeline writing `entries`.
///
/// If-absent writes load the script once at the head of the pipeline, then
/// call it by hash for every entry. Only the per-entry replies are returned.
fn write_pipeline(
    entries: &[(String, Fields)],
    mode: WriteMode,
    script: &Script,
) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    if mode == WriteMode::IfAbsent {
        pipe.cmd("SCRIPT").arg("LOAD").arg(HSET_IF_ABSENT).ignore();
    }
    for (key, fields) in entries {
        match mode {
            WriteMode::IfAbsent => {
                pipe.cmd("EVALSHA")
                    .arg(script.get_hash())
                    .arg(1)
                    .arg(key)
                    .arg(ABSENT_FIELD)
                    .arg(fields);
            }
            WriteMode::Overwrite => {
                pipe.cmd("DEL").arg(key).ignore();
                pipe.cmd("HSET").arg(key).arg(fields).ignore();
            }
        }
    }
    pipe
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn get(&self, key: &str, deadline: Deadline) -> StoreResult<Option<Fields>> {
        let pool = &self.pool;
        self.retry
            .run("cache_get", deadline, move || async move {
                let mut conn = pool.get().await?;
                let map: HashMap<String, String> = redis::cmd("HGETALL")
                    .arg(key)
                    .query_async(&mut conn)
                    .await?;
                if map.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(map.into_iter().collect()))
                }
            })
            .await
    }

    async fn set(&self, key: &str, fields: Fields, deadline: Deadline) -> StoreResult<()> {
        let mut pipe = write_pipeline(
            &[(key.to_string(), fields)],
            WriteMode::Overwrite,
            &self.write_if_absent,
        );
        pipe.atomic();
        let pipe = &pipe;
        let pool = &self.pool;
        self.retry
            .run("cache_set", deadline, move || async move {
                let mut conn = pool.get().await?;
                let _: () = pipe.query_async(&mut conn).await?;
                Ok(())
            })
            .await
    }

    async fn set_absent(&self, key: &str, deadline: Deadline) -> StoreResult<bool> {
        let pool = &self.pool;
        let script = &self.absent_if_vacant;
        self.retry
            .run("cache_set_absent", deadline, move || async move {
                let mut conn = pool.get().await?;
                let written: i64 = script
                    .key(key)
                    .arg(ABSENT_FIELD)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(written == 1)
            })
            .await
    }

    async fn exists(&self, key: &str, deadline: Deadline) -> StoreResult<bool> {
        let pool = &self.pool;
        self.retry
            .run("cache_exists", deadline, move || async move {
                let mut conn = pool.get().await?;
                let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
                Ok(count > 0)
            })
            .await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        deadline: Deadline,
    ) -> StoreResult<bool> {
        let pool = &self.pool;
        self.retry
            .run("cache_set_nx", deadline, move || async move {
                let mut conn = pool.get().await?;
                let reply: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .query_async(&mut conn)
                    .await?;
                Ok(reply.is_some())
            })
            .await
    }

    async fn pipeline_set(
        &self,
        entries: Vec<(String, Fields)>,
        mode: WriteMode,
        deadline: Deadline,
    ) -> StoreResult<u64> {
        if entries.is_empty() {
            return Ok(0);
        }
        let pipe = write_pipeline(&entries, mode, &self.write_if_absent);
        let pipe = &pipe;
        let pool = &self.pool;
        let total = entries.len() as u64;
        self.retry
            .run("cache_pipeline", deadline, move || async move {
                let mut conn = pool.get().await?;
                match mode {
                    WriteMode::IfAbsent => {
                        let written: Vec<i64> = pipe.query_async(&mut conn).await?;
                        Ok(written.into_iter().filter(|&w| w == 1).count() as u64)
                    }
                    WriteMode::Overwrite => {
                        let _: () = pipe.query_async(&mut conn).await?;
                        Ok(total)
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(count: usize) -> Vec<(String, Fields)> {
        (0..count)
            .map(|i| (i.to_string(), vec![("name".to_string(), "x".to_string())]))
            .collect()
    }

    #[test]
    fn test_if_absent_pipeline_loads_script_once() {
        let script = Script::new(HSET_IF_ABSENT);
        let pipe = write_pipeline(&entries(50), WriteMode::IfAbsent, &script);
        assert_eq!(pipe.cmd_iter().count(), 51);

        // The script body travels once; every entry refers to it by hash
        let packed = pipe.get_packed_pipeline();
        let body = HSET_IF_ABSENT.as_bytes();
        let copies = packed.windows(body.len()).filter(|w| *w == body).count();
        assert_eq!(copies, 1);
    }

    #[test]
    fn test_overwrite_pipeline_clears_before_write() {
        let script = Script::new(HSET_IF_ABSENT);
        let pipe = write_pipeline(&entries(1), WriteMode::Overwrite, &script);
        assert_eq!(pipe.cmd_iter().count(), 2);
    }

    #[tokio::test]
    async fn test_pool_uses_configured_size_and_timeouts() {
        let config = RedisConfig {
            max_size: 4,
            acquire_timeout: Duration::from_millis(250),
            ..Default::default()
        };
        let pool = config.create_pool().unwrap();
        assert_eq!(pool.status().max_size, 4);
        assert_eq!(pool.timeouts().wait, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_default_config() {
        let config = RedisConfig::default();
        assert!(config.url.starts_with("redis://"));
        assert_eq!(config.max_size, 32);
    }
}
