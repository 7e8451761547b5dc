//! Startup Preload Task
//!
//! Background task that brings the instance to ready: optionally seeds the
//! durable store, warms the cache (or waits for another instance to), then
//! marks the instance ready.
//!
//! A seed that still has failed batches after its attempts leaves the
//! instance not ready; warming an incomplete store would hide those keys.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::preload::Preloader;
use crate::service::Readiness;

/// What the startup task does before waiting for the marker.
#[derive(Debug, Clone)]
pub struct StartupOptions {
    /// Generate and insert the dataset first
    pub seed: bool,
    /// Warm from this instance instead of only waiting
    pub warm: bool,
    /// Seed attempts, and warm attempts before falling back to waiting
    pub max_attempts: u32,
    /// Pause between attempts and between marker probes
    pub poll_interval: Duration,
}

impl StartupOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            seed: config.seed_on_startup,
            warm: config.warm_on_startup,
            max_attempts: config.warm_max_attempts,
            poll_interval: config.readiness_poll,
        }
    }
}

/// Spawns the startup task.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_preload_task(
    preloader: Arc<Preloader>,
    readiness: Readiness,
    options: StartupOptions,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if options.seed && !seed_dataset(&preloader, &options).await {
            return;
        }

        if options.warm {
            for attempt in 1..=options.max_attempts {
                match preloader.warm().await {
                    Ok(report) if preloader.is_warm().await => {
                        info!(
                            "Cache warm after attempt {} ({} records, already warm: {})",
                            attempt, report.records, report.already_warm
                        );
                        readiness.mark_ready();
                        return;
                    }
                    Ok(report) => warn!(
                        "Warm attempt {} left {} shards unfinished",
                        attempt,
                        report.failed_shards.len()
                    ),
                    Err(err) => warn!("Warm attempt {} failed: {}", attempt, err),
                }
                tokio::time::sleep(options.poll_interval).await;
            }
            warn!("Warm attempts exhausted, waiting for another instance to finish");
        }

        loop {
            if preloader.is_warm().await {
                info!("Preload marker found, instance ready");
                readiness.mark_ready();
                return;
            }
            debug!("Cache not warm yet");
            tokio::time::sleep(options.poll_interval).await;
        }
    })
}

/// Seeds the configured range, re-seeding failed batches until none remain
/// or the attempts run out.
///
/// Returns false if the durable store is still incomplete.
async fn seed_dataset(preloader: &Preloader, options: &StartupOptions) -> bool {
    let range = preloader.settings().key_range;
    info!("Seeding durable store for {}", range);

    let mut outcome = preloader.seed_range(range).await;
    let mut inserted = 0;
    let mut attempt = 1;
    loop {
        let failed = match outcome {
            Ok(report) if report.failed.is_empty() => {
                info!("Seeded {} rows", inserted + report.inserted);
                return true;
            }
            Ok(report) if attempt >= options.max_attempts => {
                warn!(
                    "Seeded {} rows, accepting {} tolerated failed batches",
                    inserted + report.inserted,
                    report.failed.len()
                );
                return true;
            }
            Ok(report) => {
                inserted += report.inserted;
                report.failed
            }
            Err(err) if attempt >= options.max_attempts => {
                error!(
                    "Seeding failed after {} attempts ({}); failed ranges: {:?}, instance stays not ready",
                    attempt,
                    err,
                    err.failed.iter().map(|f| f.range.to_string()).collect::<Vec<_>>()
                );
                return false;
            }
            Err(err) => {
                inserted += err.inserted;
                err.failed
            }
        };

        warn!(
            "Seed attempt {} left {} failed batches, re-seeding them",
            attempt,
            failed.len()
        );
        attempt += 1;
        tokio::time::sleep(options.poll_interval).await;
        outcome = preloader.reseed_failed(&failed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::error::{StoreError, StoreResult};
    use crate::models::{KeyRange, ResultRecord, StudentKey};
    use crate::preload::PreloadSettings;
    use crate::store::{Deadline, DurableStore, MemoryCache, MemoryStore};

    fn options(seed: bool, warm: bool) -> StartupOptions {
        StartupOptions {
            seed,
            warm,
            max_attempts: 2,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn settings() -> PreloadSettings {
        PreloadSettings {
            key_range: KeyRange::new(1, 50),
            batch_size: 10,
            shard_count: 4,
            ..Default::default()
        }
    }

    fn preloader(cache: Arc<MemoryCache>) -> Arc<Preloader> {
        Arc::new(Preloader::new(Arc::new(MemoryStore::new()), cache, settings()))
    }

    /// Rejects inserts of the batch starting at `failing_start`, a set number of times.
    struct RejectingStore {
        inner: MemoryStore,
        failing_start: StudentKey,
        rejections_left: AtomicU32,
    }

    impl RejectingStore {
        fn new(failing_start: i64, rejections: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                failing_start: StudentKey(failing_start),
                rejections_left: AtomicU32::new(rejections),
            }
        }
    }

    #[async_trait]
    impl DurableStore for RejectingStore {
        async fn fetch(&self, key: StudentKey, deadline: Deadline) -> StoreResult<Option<ResultRecord>> {
            self.inner.fetch(key, deadline).await
        }

        async fn fetch_page(
            &self,
            start: StudentKey,
            end: StudentKey,
            limit: usize,
            deadline: Deadline,
        ) -> StoreResult<Vec<ResultRecord>> {
            self.inner.fetch_page(start, end, limit, deadline).await
        }

        async fn insert_batch(&self, rows: &[ResultRecord], deadline: Deadline) -> StoreResult<u64> {
            let targeted = rows.first().map(|r| r.student_id) == Some(self.failing_start);
            if targeted
                && self
                    .rejections_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(StoreError::Unavailable("insert rejected".to_string()));
            }
            self.inner.insert_batch(rows, deadline).await
        }
    }

    #[tokio::test]
    async fn test_seed_and_warm_marks_ready() {
        let cache = Arc::new(MemoryCache::new());
        let readiness = Readiness::new();
        let handle = spawn_preload_task(preloader(cache.clone()), readiness.clone(), options(true, true));

        handle.await.unwrap();
        assert!(readiness.is_ready());
        // 50 records plus 4 shard markers plus the ready marker
        assert_eq!(cache.len().await, 55);
    }

    #[tokio::test]
    async fn test_failed_seed_batch_is_reseeded_before_warm() {
        let store = Arc::new(RejectingStore::new(21, 1));
        let cache = Arc::new(MemoryCache::new());
        let preloader = Arc::new(Preloader::new(store.clone(), cache.clone(), settings()));
        let readiness = Readiness::new();

        spawn_preload_task(preloader, readiness.clone(), options(true, true))
            .await
            .unwrap();

        assert!(readiness.is_ready());
        assert_eq!(store.inner.len().await, 50);
        assert_eq!(cache.len().await, 55);
    }

    #[tokio::test]
    async fn test_seed_failing_every_attempt_skips_warm() {
        let store = Arc::new(RejectingStore::new(21, u32::MAX));
        let cache = Arc::new(MemoryCache::new());
        let preloader = Arc::new(Preloader::new(store.clone(), cache.clone(), settings()));
        let readiness = Readiness::new();

        tokio::time::timeout(
            Duration::from_secs(2),
            spawn_preload_task(preloader.clone(), readiness.clone(), options(true, true)),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(!readiness.is_ready());
        assert!(!preloader.is_warm().await);
        assert!(cache.is_empty().await);
        assert_eq!(store.inner.len().await, 40);
    }

    #[tokio::test]
    async fn test_passive_instance_waits_for_marker() {
        let cache = Arc::new(MemoryCache::new());
        let readiness = Readiness::new();
        let handle = spawn_preload_task(preloader(cache.clone()), readiness.clone(), options(false, false));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!readiness.is_ready());

        preloader(cache).warm().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(readiness.is_ready());
    }

    #[tokio::test]
    async fn test_task_can_be_aborted() {
        let readiness = Readiness::new();
        let handle = spawn_preload_task(
            preloader(Arc::new(MemoryCache::new())),
            readiness,
            options(false, false),
        );

        handle.abort();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
