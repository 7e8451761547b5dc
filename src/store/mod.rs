//! Store Adapters
//!
//! Typed interfaces over the durable row store and the shared cache, with
//! PostgreSQL, Redis and in-memory implementations.
//!
//! Every call carries a caller-supplied [`Deadline`]. Adapters enforce it and
//! own the (bounded) retry policy; the lookup and preload logic never retry.

mod memory;
mod postgres;
mod redis;
mod retry;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;

use crate::error::{StoreError, StoreResult};
use crate::models::{Fields, ResultRecord, StudentKey};

pub use memory::{MemoryCache, MemoryCacheStats, MemoryStore};
pub use postgres::{PgConfig, PgStore};
pub use redis::{RedisCache, RedisConfig};
pub use retry::RetryPolicy;

// == Deadline ==
/// Point in time by which a store call must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Time left before the deadline (zero once passed).
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Runs `fut`, failing with [`StoreError::Timeout`] if the deadline passes first.
    pub async fn run<T, F>(self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

// == Durable Store ==
/// Authoritative keyed row store.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetches one record by key.
    async fn fetch(&self, key: StudentKey, deadline: Deadline) -> StoreResult<Option<ResultRecord>>;

    /// Fetches up to `limit` records with keys in `[start, end]`, in ascending key order.
    async fn fetch_page(
        &self,
        start: StudentKey,
        end: StudentKey,
        limit: usize,
        deadline: Deadline,
    ) -> StoreResult<Vec<ResultRecord>>;

    /// Inserts records, skipping keys that already exist.
    ///
    /// Returns the number of rows actually inserted.
    async fn insert_batch(&self, rows: &[ResultRecord], deadline: Deadline) -> StoreResult<u64>;

    /// Lazily pages through `[start, end]`, one `fetch_page` call per page.
    ///
    /// Each page call gets its own deadline of `call_timeout`.
    fn fetch_range(
        &self,
        start: StudentKey,
        end: StudentKey,
        page_size: usize,
        call_timeout: Duration,
    ) -> BoxStream<'_, StoreResult<Vec<ResultRecord>>> {
        let page_size = page_size.max(1);
        stream::try_unfold(Some(start), move |cursor| {
            next_page(self, cursor, end, page_size, call_timeout)
        })
        .boxed()
    }
}

/// One step of [`DurableStore::fetch_range`]: the page at `cursor` and the next cursor.
async fn next_page<S>(
    store: &S,
    cursor: Option<StudentKey>,
    end: StudentKey,
    page_size: usize,
    call_timeout: Duration,
) -> StoreResult<Option<(Vec<ResultRecord>, Option<StudentKey>)>>
where
    S: DurableStore + ?Sized,
{
    let from = match cursor {
        Some(from) if from <= end => from,
        _ => return Ok(None),
    };
    let page = store
        .fetch_page(from, end, page_size, Deadline::after(call_timeout))
        .await?;
    let next = match page.last() {
        Some(last) if page.len() == page_size && last.student_id < end => {
            Some(last.student_id.next())
        }
        _ => None,
    };
    if page.is_empty() {
        Ok(None)
    } else {
        Ok(Some((page, next)))
    }
}

// == Cache ==
/// How a pipelined write treats keys that already hold an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace whatever is stored
    Overwrite,
    /// Write only keys with no entry (negative entries count as no entry)
    IfAbsent,
}

/// Shared keyed cache holding field-mapped entries.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Reads all fields of an entry.
    async fn get(&self, key: &str, deadline: Deadline) -> StoreResult<Option<Fields>>;

    /// Replaces an entry.
    async fn set(&self, key: &str, fields: Fields, deadline: Deadline) -> StoreResult<()>;

    /// Writes a negative entry unless `key` already holds a value.
    ///
    /// Returns true if this call wrote it. Never replaces a record, so a
    /// lookup racing a warm cannot hide the warmed entry.
    async fn set_absent(&self, key: &str, deadline: Deadline) -> StoreResult<bool>;

    /// Returns true if any value is stored under `key`.
    async fn exists(&self, key: &str, deadline: Deadline) -> StoreResult<bool>;

    /// Atomically stores a plain string value if the key is unused.
    ///
    /// Returns true if this call wrote the value.
    async fn set_if_absent(&self, key: &str, value: &str, deadline: Deadline)
        -> StoreResult<bool>;

    /// Writes many entries in one round trip.
    ///
    /// Returns the number of entries actually written.
    async fn pipeline_set(
        &self,
        entries: Vec<(String, Fields)>,
        mode: WriteMode,
        deadline: Deadline,
    ) -> StoreResult<u64>;
}
