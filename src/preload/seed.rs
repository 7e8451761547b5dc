//! Batch seeding of the durable store.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{batches, Preloader, SeedReport};
use crate::error::{BatchFailure, SeedError, StoreError, StoreResult};
use crate::models::{KeyRange, RecordBatch};
use crate::store::Deadline;

impl Preloader {
    // == Seed ==
    /// Inserts `batches` into the durable store with bounded parallelism.
    ///
    /// Batches are pulled from the iterator only when a worker slot is free.
    /// A failed batch never cancels its siblings, and committed batches stay
    /// committed; the error lists the failed ranges so only those need to be
    /// re-seeded.
    pub async fn seed<I>(&self, batches: I) -> Result<SeedReport, SeedError>
    where
        I: IntoIterator<Item = RecordBatch>,
    {
        let workers = Arc::new(Semaphore::new(self.settings.worker_count.max(1)));
        let mut in_flight: Vec<(KeyRange, JoinHandle<StoreResult<u64>>)> = Vec::new();

        for batch in batches {
            if batch.is_empty() {
                continue;
            }
            let Ok(permit) = Arc::clone(&workers).acquire_owned().await else {
                break;
            };
            let store = Arc::clone(&self.store);
            let timeout = self.settings.bulk_timeout;
            let range = batch.range;
            let handle = tokio::spawn(async move {
                let _permit = permit;
                store
                    .insert_batch(&batch.records, Deadline::after(timeout))
                    .await
            });
            in_flight.push((range, handle));
        }

        let attempted = in_flight.len();
        let mut inserted = 0;
        let mut failed = Vec::new();
        for (range, handle) in in_flight {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(StoreError::Backend(format!("seed worker died: {}", e))));
            match outcome {
                Ok(rows) => inserted += rows,
                Err(cause) => {
                    warn!(%range, error = %cause, "seed batch failed");
                    failed.push(BatchFailure { range, cause });
                }
            }
        }

        if failed.len() > self.settings.failure_tolerance {
            warn!(
                "Seed incomplete: {} of {} batches failed, {} rows inserted",
                failed.len(),
                attempted,
                inserted
            );
            return Err(SeedError {
                inserted,
                attempted,
                failed,
            });
        }

        info!(
            "Seed finished: {} rows inserted in {} batches ({} tolerated failures)",
            inserted,
            attempted,
            failed.len()
        );
        Ok(SeedReport {
            inserted,
            batches: attempted,
            failed,
        })
    }

    /// Seeds generated records for `range`.
    pub async fn seed_range(&self, range: KeyRange) -> Result<SeedReport, SeedError> {
        self.seed(batches(range, self.settings.batch_size)).await
    }

    /// Re-seeds only the ranges of earlier failures.
    pub async fn reseed_failed(&self, failed: &[BatchFailure]) -> Result<SeedReport, SeedError> {
        let batch_size = self.settings.batch_size;
        let ranges: Vec<KeyRange> = failed.iter().map(|f| f.range).collect();
        self.seed(
            ranges
                .into_iter()
                .flat_map(move |range| batches(range, batch_size)),
        )
        .await
    }
}
