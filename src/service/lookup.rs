//! Cache-aside lookup of a single student's result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::stats::{LookupStats, StatsSnapshot};
use crate::error::{LookupError, Result};
use crate::models::{CachedValue, Fields, KeyRange, ResultRecord, StudentKey};
use crate::store::{Deadline, DurableStore, ResultCache};

/// Lookup behaviour knobs.
#[derive(Debug, Clone)]
pub struct LookupSettings {
    /// Valid student ids; anything outside is rejected without I/O
    pub key_range: KeyRange,
    /// Deadline applied to each store call
    pub call_timeout: Duration,
    /// Cache durable misses as negative entries
    pub negative_cache: bool,
    /// Collapse concurrent misses for one key into a single durable fetch
    pub coalesce_misses: bool,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            key_range: KeyRange::new(10_000, 683_999),
            call_timeout: Duration::from_secs(1),
            negative_cache: false,
            coalesce_misses: false,
        }
    }
}

// == Lookup Service ==
/// Answers result lookups from the cache, falling back to the durable store.
///
/// Holds no state shared with other instances: replicas only meet in the two
/// stores. The optional in-flight registry coalesces misses within this
/// process only.
pub struct LookupService {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn ResultCache>,
    settings: LookupSettings,
    stats: LookupStats,
    inflight: Mutex<HashMap<StudentKey, Arc<Mutex<()>>>>,
}

impl LookupService {
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn ResultCache>,
        settings: LookupSettings,
    ) -> Self {
        Self {
            store,
            cache,
            settings,
            stats: LookupStats::new(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &LookupSettings {
        &self.settings
    }

    /// Current counter values for this instance.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Parses and range-checks a textual student id.
    pub fn parse_key(&self, raw: &str) -> Result<StudentKey> {
        self.settings.key_range.parse(raw)
    }

    // == Get Result ==
    /// Returns the result for `key`.
    ///
    /// Cache failures degrade to a durable read; durable failures are returned
    /// as `Timeout` or `StoreUnavailable`.
    pub async fn get_result(&self, key: StudentKey) -> Result<ResultRecord> {
        let key = self.settings.key_range.check(key)?;
        let cache_key = key.cache_key();

        if let Some(answer) = self.read_cache(key, &cache_key).await {
            return answer;
        }

        if self.settings.coalesce_misses {
            self.fetch_coalesced(key, &cache_key).await
        } else {
            self.fetch_and_fill(key, &cache_key).await
        }
    }

    /// Returns `Some` when the cache answered the lookup.
    async fn read_cache(&self, key: StudentKey, cache_key: &str) -> Option<Result<ResultRecord>> {
        let deadline = Deadline::after(self.settings.call_timeout);
        let fields = match self.cache.get(cache_key, deadline).await {
            Ok(Some(fields)) => fields,
            Ok(None) => return None,
            Err(err) => {
                warn!(%key, error = %err, "cache read failed, falling back to durable store");
                self.stats.record_cache_error();
                return None;
            }
        };

        match CachedValue::decode(&fields) {
            Ok(CachedValue::Record(record)) => {
                self.stats.record_hit();
                Some(Ok(record))
            }
            Ok(CachedValue::Absent) if self.settings.negative_cache => {
                self.stats.record_hit();
                self.stats.record_not_found();
                Some(Err(LookupError::NotFound(key)))
            }
            Ok(CachedValue::Absent) => None,
            Err(reason) => {
                warn!(%key, %reason, "undecodable cache entry, treating as miss");
                self.stats.record_cache_error();
                None
            }
        }
    }

    /// Single durable fetch per key at a time; followers re-check the cache
    /// once the leader is done.
    async fn fetch_coalesced(&self, key: StudentKey, cache_key: &str) -> Result<ResultRecord> {
        let lock = {
            let mut map = self.inflight.lock().await;
            Arc::clone(
                map.entry(key)
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let result = {
            let _guard = lock.lock().await;
            match self.read_cache(key, cache_key).await {
                Some(answer) => answer,
                None => self.fetch_and_fill(key, cache_key).await,
            }
        };

        let mut map = self.inflight.lock().await;
        // Registry and this handle are the only owners: nobody else is waiting
        if Arc::strong_count(&lock) <= 2 {
            map.remove(&key);
        }
        result
    }

    async fn fetch_and_fill(&self, key: StudentKey, cache_key: &str) -> Result<ResultRecord> {
        self.stats.record_miss();
        let deadline = Deadline::after(self.settings.call_timeout);
        let fetched = self.store.fetch(key, deadline).await.map_err(|err| {
            warn!(%key, error = %err, "durable fetch failed");
            LookupError::from(err)
        })?;

        match fetched {
            Some(record) => {
                self.fill(key, cache_key, record.to_fields()).await;
                Ok(record)
            }
            None => {
                self.stats.record_not_found();
                if self.settings.negative_cache {
                    self.fill_absent(key, cache_key).await;
                }
                Err(LookupError::NotFound(key))
            }
        }
    }

    /// Best-effort write-back; failures are only logged and counted.
    async fn fill(&self, key: StudentKey, cache_key: &str, fields: Fields) {
        let deadline = Deadline::after(self.settings.call_timeout);
        match self.cache.set(cache_key, fields, deadline).await {
            Ok(()) => {
                debug!(%key, "cache filled");
                self.stats.record_fill();
            }
            Err(err) => {
                warn!(%key, error = %err, "cache write-back failed");
                self.stats.record_fill_failure();
            }
        }
    }

    /// Best-effort negative entry; an entry written meanwhile is left alone.
    async fn fill_absent(&self, key: StudentKey, cache_key: &str) {
        let deadline = Deadline::after(self.settings.call_timeout);
        match self.cache.set_absent(cache_key, deadline).await {
            Ok(true) => {
                debug!(%key, "negative entry written");
                self.stats.record_fill();
            }
            Ok(false) => debug!(%key, "entry appeared before negative write, kept"),
            Err(err) => {
                warn!(%key, error = %err, "negative entry write failed");
                self.stats.record_fill_failure();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultStatus, Scores, Stream};
    use crate::store::{MemoryCache, MemoryStore};

    fn record(id: i64) -> ResultRecord {
        ResultRecord::new(
            StudentKey(id),
            "Asha",
            Stream::Commerce,
            Scores {
                english: 61,
                mathematics: 72,
                physics: 55,
                chemistry: 48,
                elective: 90,
            },
            ResultStatus::Declared,
        )
    }

    async fn setup(settings: LookupSettings) -> (Arc<MemoryStore>, Arc<MemoryCache>, LookupService) {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_batch(&[record(10_000), record(10_001)], Deadline::after(Duration::from_secs(1)))
            .await
            .unwrap();
        let cache = Arc::new(MemoryCache::new());
        let service = LookupService::new(store.clone(), cache.clone(), settings);
        (store, cache, service)
    }

    #[tokio::test]
    async fn test_out_of_range_key_touches_no_store() {
        let (store, cache, service) = setup(LookupSettings::default()).await;
        let err = service.get_result(StudentKey(99_999_999)).await.unwrap_err();
        assert!(matches!(err, LookupError::InvalidKey(_)));
        assert_eq!(store.fetch_calls(), 0);
        assert_eq!(cache.stats().await.misses, 0);
    }

    #[tokio::test]
    async fn test_miss_fills_cache_then_hits() {
        let (store, cache, service) = setup(LookupSettings::default()).await;

        let first = service.get_result(StudentKey(10_001)).await.unwrap();
        let second = service.get_result(StudentKey(10_001)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.fetch_calls(), 1);
        assert_eq!(cache.len().await, 1);
        let stats = service.stats();
        assert_eq!((stats.hits, stats.misses, stats.fills), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached_by_default() {
        let (store, cache, service) = setup(LookupSettings::default()).await;

        for _ in 0..2 {
            let err = service.get_result(StudentKey(10_003)).await.unwrap_err();
            assert!(matches!(err, LookupError::NotFound(StudentKey(10_003))));
        }
        assert_eq!(store.fetch_calls(), 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_negative_cache_answers_repeat_misses() {
        let settings = LookupSettings {
            negative_cache: true,
            ..Default::default()
        };
        let (store, _cache, service) = setup(settings).await;

        for _ in 0..3 {
            assert!(matches!(
                service.get_result(StudentKey(10_003)).await,
                Err(LookupError::NotFound(_))
            ));
        }
        assert_eq!(store.fetch_calls(), 1);
        assert_eq!(service.stats().not_found, 3);
    }

    #[tokio::test]
    async fn test_parse_key() {
        let (_store, _cache, service) = setup(LookupSettings::default()).await;
        assert_eq!(service.parse_key("10001").unwrap(), StudentKey(10_001));
        assert!(matches!(
            service.parse_key("abc"),
            Err(LookupError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_coalesced_lookup_cleans_registry() {
        let settings = LookupSettings {
            coalesce_misses: true,
            ..Default::default()
        };
        let (_store, _cache, service) = setup(settings).await;
        service.get_result(StudentKey(10_000)).await.unwrap();
        assert!(service.inflight.lock().await.is_empty());
    }
}
