//! Cache warming from the durable store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::TryStreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{partition, PreloadMarker, Preloader, ResumeMode, WarmReport};
use crate::error::{ShardFailure, StoreError, StoreResult, WarmError};
use crate::models::KeyRange;
use crate::store::{Deadline, DurableStore, ResultCache, WriteMode};

/// Counts for one finished shard.
#[derive(Debug, Clone, Copy, Default)]
struct ShardOutcome {
    read: u64,
    written: u64,
}

/// Everything one shard task needs; owned so the task is `'static`.
struct ShardWorker {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn ResultCache>,
    page_size: usize,
    call_timeout: Duration,
    bulk_timeout: Duration,
    /// Written once the shard completes, in failed-only resume mode
    done_marker: Option<String>,
}

impl ShardWorker {
    /// Copies one shard page by page; each page is one pipelined round trip.
    async fn run(self, shard: KeyRange) -> StoreResult<ShardOutcome> {
        let mut outcome = ShardOutcome::default();
        let mut pages =
            self.store
                .fetch_range(shard.start, shard.end, self.page_size, self.bulk_timeout);

        while let Some(page) = pages.try_next().await? {
            outcome.read += page.len() as u64;
            let entries = page
                .iter()
                .map(|record| (record.student_id.cache_key(), record.to_fields()))
                .collect();
            outcome.written += self
                .cache
                .pipeline_set(entries, WriteMode::IfAbsent, Deadline::after(self.bulk_timeout))
                .await?;
        }

        if let Some(marker) = &self.done_marker {
            self.cache
                .set_if_absent(marker, &outcome.read.to_string(), Deadline::after(self.call_timeout))
                .await?;
        }
        debug!(%shard, read = outcome.read, written = outcome.written, "shard warmed");
        Ok(outcome)
    }
}

impl Preloader {
    // == Is Warm ==
    /// Returns true if the preload marker for this generation exists.
    ///
    /// One existence probe; a cache error reads as "not warm".
    pub async fn is_warm(&self) -> bool {
        let deadline = Deadline::after(self.settings.call_timeout);
        match self.cache.exists(&self.marker_key(), deadline).await {
            Ok(warm) => warm,
            Err(err) => {
                warn!(error = %err, "preload marker probe failed");
                false
            }
        }
    }

    // == Warm ==
    /// Copies the whole key range from the durable store into the cache once.
    ///
    /// Returns immediately when the marker already exists. Attempts in this
    /// process run one at a time; other processes are kept safe by the
    /// set-if-absent writes and the set-if-absent marker. The marker is only
    /// written after every shard task has finished without failure.
    pub async fn warm(&self) -> Result<WarmReport, WarmError> {
        let _single_flight = self.warm_lock.lock().await;
        if self.is_warm().await {
            debug!("cache already warm for generation {}", self.settings.generation);
            return Ok(WarmReport::already_warm());
        }

        let shards = partition(self.settings.key_range, self.settings.shard_count);
        info!(
            "Warming cache: {} shards over {}, {} workers",
            shards.len(),
            self.settings.key_range,
            self.settings.worker_count
        );

        let workers = Arc::new(Semaphore::new(self.settings.worker_count.max(1)));
        let mut in_flight: Vec<(KeyRange, JoinHandle<StoreResult<ShardOutcome>>)> = Vec::new();
        let mut skipped_shards = 0;

        for shard in shards {
            if self.settings.resume == ResumeMode::FailedOnly && self.shard_done(shard).await {
                skipped_shards += 1;
                continue;
            }
            let Ok(permit) = Arc::clone(&workers).acquire_owned().await else {
                break;
            };
            let worker = self.shard_worker(shard);
            let handle = tokio::spawn(async move {
                let _permit = permit;
                worker.run(shard).await
            });
            in_flight.push((shard, handle));
        }

        // Completion barrier: every shard task is joined before the marker decision
        let shards = in_flight.len();
        let mut records = 0;
        let mut written = 0;
        let mut failed_shards = Vec::new();
        for (shard, handle) in in_flight {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(StoreError::Backend(format!("warm worker died: {}", e))));
            match outcome {
                Ok(done) => {
                    records += done.read;
                    written += done.written;
                }
                Err(cause) => {
                    warn!(%shard, error = %cause, "warm shard failed");
                    failed_shards.push(ShardFailure { shard, cause });
                }
            }
        }

        if failed_shards.len() > self.settings.failure_tolerance {
            warn!(
                "Warm incomplete: {} of {} shards failed, marker not set",
                failed_shards.len(),
                shards
            );
            return Err(WarmError {
                records,
                failed_shards,
            });
        }

        let marker_set = if failed_shards.is_empty() {
            self.set_marker(records).await.map_err(|cause| WarmError {
                records,
                failed_shards: vec![ShardFailure {
                    shard: self.settings.key_range,
                    cause,
                }],
            })?
        } else {
            warn!(
                "Warm finished with {} tolerated shard failures, marker not set",
                failed_shards.len()
            );
            false
        };

        info!(
            "Warm finished: {} records read, {} entries written, {} shards skipped",
            records, written, skipped_shards
        );
        Ok(WarmReport {
            records,
            written,
            shards,
            skipped_shards,
            already_warm: false,
            marker_set,
            failed_shards,
        })
    }

    fn shard_worker(&self, shard: KeyRange) -> ShardWorker {
        ShardWorker {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            page_size: self.settings.page_size,
            call_timeout: self.settings.call_timeout,
            bulk_timeout: self.settings.bulk_timeout,
            done_marker: (self.settings.resume == ResumeMode::FailedOnly)
                .then(|| self.shard_marker_key(shard)),
        }
    }

    /// True if an earlier run completed `shard`. Probe errors count as not done.
    async fn shard_done(&self, shard: KeyRange) -> bool {
        let deadline = Deadline::after(self.settings.call_timeout);
        match self.cache.exists(&self.shard_marker_key(shard), deadline).await {
            Ok(done) => done,
            Err(err) => {
                warn!(%shard, error = %err, "shard marker probe failed");
                false
            }
        }
    }

    /// Writes the preload marker. Returns false if another process got there first.
    async fn set_marker(&self, records: u64) -> StoreResult<bool> {
        let marker = PreloadMarker {
            generation: self.settings.generation.clone(),
            records,
            completed_at: Utc::now(),
        };
        let value = serde_json::to_string(&marker)
            .map_err(|e| StoreError::Backend(format!("failed to encode preload marker: {}", e)))?;
        let deadline = Deadline::after(self.settings.call_timeout);
        let set = self
            .cache
            .set_if_absent(&self.marker_key(), &value, deadline)
            .await?;
        if set {
            info!("Preload marker {} set", self.marker_key());
        } else {
            info!("Preload marker {} already set by another worker", self.marker_key());
        }
        Ok(set)
    }
}
