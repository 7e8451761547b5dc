//! Shared fixtures for integration tests: sample records and fault-injecting
//! store wrappers.

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use exam_cache::error::{StoreError, StoreResult};
use exam_cache::models::{Fields, KeyRange, ResultRecord, ResultStatus, Scores, Stream, StudentKey};
use exam_cache::store::{Deadline, DurableStore, MemoryStore, ResultCache, WriteMode};

// == Records ==

pub fn sample_record(id: i64) -> ResultRecord {
    ResultRecord::new(
        StudentKey(id),
        format!("Student {}", id),
        Stream::Science,
        Scores {
            english: 72,
            mathematics: 88,
            physics: 64,
            chemistry: 59,
            elective: 91,
        },
        ResultStatus::Declared,
    )
}

pub fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(2))
}

// == Flaky Store ==

/// How an injected fault behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Never answers; the caller's deadline fires
    Stall,
    /// Fails straight away as if the pool were exhausted
    Unavailable,
}

async fn inject(fault: Option<Fault>, deadline: Deadline) -> StoreResult<()> {
    match fault {
        None => Ok(()),
        Some(Fault::Stall) => {
            deadline
                .run(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                })
                .await
        }
        Some(Fault::Unavailable) => Err(StoreError::Unavailable("injected fault".to_string())),
    }
}

/// Durable store that can stall or fail on chosen key ranges.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fetch_fault: Mutex<Option<Fault>>,
    fetch_delay: Mutex<Duration>,
    reply_delay: Mutex<Duration>,
    page_fault: Mutex<Option<(KeyRange, Fault)>>,
    insert_fault: Mutex<Option<(KeyRange, Fault)>>,
    page_starts: Mutex<Vec<StudentKey>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_fetches(&self, fault: Option<Fault>) {
        *self.fetch_fault.lock().unwrap() = fault;
    }

    /// Every single-key fetch sleeps this long first.
    pub fn delay_fetches(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    /// Every single-key fetch reads the row first, then sleeps this long
    /// before answering.
    pub fn delay_replies(&self, delay: Duration) {
        *self.reply_delay.lock().unwrap() = delay;
    }

    /// Page reads starting inside `range` hit `fault`.
    pub fn fail_pages(&self, fault: Option<(KeyRange, Fault)>) {
        *self.page_fault.lock().unwrap() = fault;
    }

    /// Batch inserts whose first key lies inside `range` hit `fault`.
    pub fn fail_inserts(&self, fault: Option<(KeyRange, Fault)>) {
        *self.insert_fault.lock().unwrap() = fault;
    }

    /// Start keys of every page read so far.
    pub fn page_starts(&self) -> Vec<StudentKey> {
        self.page_starts.lock().unwrap().clone()
    }

    pub fn clear_page_log(&self) {
        self.page_starts.lock().unwrap().clear();
    }

    pub fn fetch_calls(&self) -> u64 {
        self.inner.fetch_calls()
    }
}

fn fault_for(slot: &Mutex<Option<(KeyRange, Fault)>>, key: StudentKey) -> Option<Fault> {
    match *slot.lock().unwrap() {
        Some((range, fault)) if range.contains(key) => Some(fault),
        _ => None,
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn fetch(&self, key: StudentKey, deadline: Deadline) -> StoreResult<Option<ResultRecord>> {
        let fault = *self.fetch_fault.lock().unwrap();
        inject(fault, deadline).await?;
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            deadline
                .run(async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
        }
        let row = self.inner.fetch(key, deadline).await?;
        let delay = *self.reply_delay.lock().unwrap();
        if !delay.is_zero() {
            deadline
                .run(async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
        }
        Ok(row)
    }

    async fn fetch_page(
        &self,
        start: StudentKey,
        end: StudentKey,
        limit: usize,
        deadline: Deadline,
    ) -> StoreResult<Vec<ResultRecord>> {
        self.page_starts.lock().unwrap().push(start);
        let fault = fault_for(&self.page_fault, start);
        inject(fault, deadline).await?;
        self.inner.fetch_page(start, end, limit, deadline).await
    }

    async fn insert_batch(&self, rows: &[ResultRecord], deadline: Deadline) -> StoreResult<u64> {
        if let Some(first) = rows.first() {
            let fault = fault_for(&self.insert_fault, first.student_id);
            inject(fault, deadline).await?;
        }
        self.inner.insert_batch(rows, deadline).await
    }
}

// == Broken Cache ==

/// Cache whose every call fails.
pub struct BrokenCache;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable("cache is down".to_string()))
}

#[async_trait]
impl ResultCache for BrokenCache {
    async fn get(&self, _key: &str, _deadline: Deadline) -> StoreResult<Option<Fields>> {
        down()
    }

    async fn set(&self, _key: &str, _fields: Fields, _deadline: Deadline) -> StoreResult<()> {
        down()
    }

    async fn set_absent(&self, _key: &str, _deadline: Deadline) -> StoreResult<bool> {
        down()
    }

    async fn exists(&self, _key: &str, _deadline: Deadline) -> StoreResult<bool> {
        down()
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: &str,
        _deadline: Deadline,
    ) -> StoreResult<bool> {
        down()
    }

    async fn pipeline_set(
        &self,
        _entries: Vec<(String, Fields)>,
        _mode: WriteMode,
        _deadline: Deadline,
    ) -> StoreResult<u64> {
        down()
    }
}
