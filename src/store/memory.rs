//! In-Memory Stores
//!
//! Process-local implementations of both store traits. Used when the service
//! runs without PostgreSQL/Redis, and as the backing stores in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use super::{Deadline, DurableStore, ResultCache, WriteMode};
use crate::error::{StoreError, StoreResult};
use crate::models::{CachedValue, Fields, ResultRecord, StudentKey};

// == Memory Store ==
/// Ordered in-memory row store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<StudentKey, ResultRecord>>,
    fetch_calls: AtomicU64,
    page_calls: AtomicU64,
    insert_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Number of single-key fetches served.
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::Relaxed)
    }

    /// Number of page fetches served.
    pub fn page_calls(&self) -> u64 {
        self.page_calls.load(Ordering::Relaxed)
    }

    /// Number of batch inserts served.
    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn fetch(&self, key: StudentKey, deadline: Deadline) -> StoreResult<Option<ResultRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        deadline
            .run(async { Ok(self.rows.read().await.get(&key).cloned()) })
            .await
    }

    async fn fetch_page(
        &self,
        start: StudentKey,
        end: StudentKey,
        limit: usize,
        deadline: Deadline,
    ) -> StoreResult<Vec<ResultRecord>> {
        self.page_calls.fetch_add(1, Ordering::Relaxed);
        if start > end {
            return Ok(Vec::new());
        }
        deadline
            .run(async {
                let rows = self.rows.read().await;
                Ok(rows
                    .range(start..=end)
                    .take(limit)
                    .map(|(_, record)| record.clone())
                    .collect())
            })
            .await
    }

    async fn insert_batch(&self, rows: &[ResultRecord], deadline: Deadline) -> StoreResult<u64> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        deadline
            .run(async {
                let mut stored = self.rows.write().await;
                let mut inserted = 0;
                for record in rows {
                    if !stored.contains_key(&record.student_id) {
                        stored.insert(record.student_id, record.clone());
                        inserted += 1;
                    }
                }
                Ok(inserted)
            })
            .await
    }
}

// == Memory Cache ==
/// Counters kept by [`MemoryCache`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryCacheStats {
    /// Reads that found an entry
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Entries written (set or pipelined)
    pub writes: u64,
    /// Pipelined if-absent writes skipped because the key was present
    pub skipped_writes: u64,
    /// Successful set-if-absent string writes
    pub marker_sets: u64,
    /// Pipeline round trips
    pub pipelines: u64,
}

#[derive(Debug, Clone)]
enum Slot {
    Hash(Fields),
    Text(String),
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, Slot>,
    stats: MemoryCacheStats,
}

impl CacheInner {
    /// True if an if-absent write may replace the current slot.
    fn writable_if_absent(&self, key: &str) -> bool {
        match self.entries.get(key) {
            None => true,
            Some(Slot::Hash(fields)) => CachedValue::is_absent(fields),
            Some(Slot::Text(_)) => false,
        }
    }
}

/// Hash-map backed cache with hit/miss statistics.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: RwLock<CacheInner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns current cache statistics.
    pub async fn stats(&self) -> MemoryCacheStats {
        self.inner.read().await.stats.clone()
    }

    /// Returns the current number of keys in the cache.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Reads a plain string value, if one is stored under `key`.
    pub async fn get_text(&self, key: &str) -> Option<String> {
        match self.inner.read().await.entries.get(key) {
            Some(Slot::Text(value)) => Some(value.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str, deadline: Deadline) -> StoreResult<Option<Fields>> {
        deadline
            .run(async {
                // Write lock: stats are updated on every read
                let mut inner = self.inner.write().await;
                let slot = inner.entries.get(key).cloned();
                match slot {
                    Some(Slot::Hash(fields)) => {
                        inner.stats.hits += 1;
                        Ok(Some(fields))
                    }
                    Some(Slot::Text(_)) => Err(StoreError::Backend(format!(
                        "key '{}' holds a plain value, not a hash",
                        key
                    ))),
                    None => {
                        inner.stats.misses += 1;
                        Ok(None)
                    }
                }
            })
            .await
    }

    async fn set(&self, key: &str, fields: Fields, deadline: Deadline) -> StoreResult<()> {
        deadline
            .run(async {
                let mut inner = self.inner.write().await;
                inner.entries.insert(key.to_string(), Slot::Hash(fields));
                inner.stats.writes += 1;
                Ok(())
            })
            .await
    }

    async fn set_absent(&self, key: &str, deadline: Deadline) -> StoreResult<bool> {
        deadline
            .run(async {
                let mut inner = self.inner.write().await;
                if inner.entries.contains_key(key) {
                    inner.stats.skipped_writes += 1;
                    return Ok(false);
                }
                inner
                    .entries
                    .insert(key.to_string(), Slot::Hash(CachedValue::absent_fields()));
                inner.stats.writes += 1;
                Ok(true)
            })
            .await
    }

    async fn exists(&self, key: &str, deadline: Deadline) -> StoreResult<bool> {
        deadline
            .run(async { Ok(self.inner.read().await.entries.contains_key(key)) })
            .await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        deadline: Deadline,
    ) -> StoreResult<bool> {
        deadline
            .run(async {
                let mut inner = self.inner.write().await;
                if inner.entries.contains_key(key) {
                    return Ok(false);
                }
                inner
                    .entries
                    .insert(key.to_string(), Slot::Text(value.to_string()));
                inner.stats.marker_sets += 1;
                Ok(true)
            })
            .await
    }

    async fn pipeline_set(
        &self,
        entries: Vec<(String, Fields)>,
        mode: WriteMode,
        deadline: Deadline,
    ) -> StoreResult<u64> {
        deadline
            .run(async {
                let mut inner = self.inner.write().await;
                inner.stats.pipelines += 1;
                let mut written = 0;
                for (key, fields) in entries {
                    if mode == WriteMode::IfAbsent && !inner.writable_if_absent(&key) {
                        inner.stats.skipped_writes += 1;
                        continue;
                    }
                    inner.entries.insert(key, Slot::Hash(fields));
                    inner.stats.writes += 1;
                    written += 1;
                }
                Ok(written)
            })
            .await
    }
}
