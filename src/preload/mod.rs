//! Preload Module
//!
//! Seeds the durable store in batches and warms the cache from it exactly
//! once per dataset generation.
//!
//! Warm state lives in the cache itself as a marker key written with
//! set-if-absent, so independently started processes agree on it.

mod generate;
mod seed;
mod shard;
mod warm;


use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{BatchFailure, ShardFailure};
use crate::models::KeyRange;
use crate::store::{DurableStore, ResultCache};

pub use generate::{batches, generate_record, BatchIter};
pub use shard::partition;

// == Settings ==
/// What a retried warm re-reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Every shard is read again; set-if-absent writes keep it harmless
    Full,
    /// Shards with a completion marker are skipped
    FailedOnly,
}

impl ResumeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeMode::Full => "full",
            ResumeMode::FailedOnly => "failed-only",
        }
    }
}

impl FromStr for ResumeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(ResumeMode::Full),
            "failed-only" => Ok(ResumeMode::FailedOnly),
            other => Err(format!("unknown resume mode '{}'", other)),
        }
    }
}

impl fmt::Display for ResumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preloader configuration.
#[derive(Debug, Clone)]
pub struct PreloadSettings {
    /// Key space to seed and warm
    pub key_range: KeyRange,
    /// Rows per seed insert
    pub batch_size: usize,
    /// Rows per durable page read while warming
    pub page_size: usize,
    /// Maximum concurrently running seed/warm workers
    pub worker_count: usize,
    /// Number of contiguous warm shards
    pub shard_count: usize,
    /// Deadline for single-key calls (marker probes and writes)
    pub call_timeout: Duration,
    /// Deadline for bulk calls (batch inserts, page reads, pipelines)
    pub bulk_timeout: Duration,
    /// Failed batches/shards accepted before seed/warm return an error
    pub failure_tolerance: usize,
    pub resume: ResumeMode,
    /// Dataset generation the markers belong to
    pub generation: String,
}

impl Default for PreloadSettings {
    fn default() -> Self {
        Self {
            key_range: KeyRange::new(10_000, 683_999),
            batch_size: 5_000,
            page_size: 1_000,
            worker_count: 8,
            shard_count: 16,
            call_timeout: Duration::from_secs(1),
            bulk_timeout: Duration::from_secs(30),
            failure_tolerance: 0,
            resume: ResumeMode::FailedOnly,
            generation: "v1".to_string(),
        }
    }
}

// == Reports ==
/// Outcome of a seed run that stayed within the failure tolerance.
#[derive(Debug, Clone, Default)]
pub struct SeedReport {
    /// Rows actually inserted (existing keys are skipped)
    pub inserted: u64,
    /// Batches dispatched
    pub batches: usize,
    /// Tolerated failures; re-seed these ranges to complete the dataset
    pub failed: Vec<BatchFailure>,
}

/// Outcome of a warm run that stayed within the failure tolerance.
#[derive(Debug, Clone, Default)]
pub struct WarmReport {
    /// Records read from the durable store by this run (skipped shards excluded)
    pub records: u64,
    /// Cache entries written by this run
    pub written: u64,
    /// Shards processed by this run
    pub shards: usize,
    /// Shards skipped because an earlier run completed them
    pub skipped_shards: usize,
    /// The cache was already warm; nothing was done
    pub already_warm: bool,
    /// This run wrote the preload marker
    pub marker_set: bool,
    /// Tolerated failures; the marker is not set while any remain
    pub failed_shards: Vec<ShardFailure>,
}

impl WarmReport {
    fn already_warm() -> Self {
        Self {
            already_warm: true,
            ..Default::default()
        }
    }
}

/// Value stored under the preload marker key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadMarker {
    pub generation: String,
    /// Records read by the run that set the marker. A failed-only resume
    /// counts just the shards it re-read, not those skipped.
    pub records: u64,
    pub completed_at: DateTime<Utc>,
}

// == Preloader ==
/// Coordinates seeding and warming against the shared stores.
pub struct Preloader {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn ResultCache>,
    settings: PreloadSettings,
    /// Serialises warm attempts in this process
    warm_lock: Mutex<()>,
}

impl Preloader {
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn ResultCache>,
        settings: PreloadSettings,
    ) -> Self {
        Self {
            store,
            cache,
            settings,
            warm_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &PreloadSettings {
        &self.settings
    }

    /// Key of the marker stating the cache is warm for this generation.
    pub fn marker_key(&self) -> String {
        format!("preload:{}:ready", self.settings.generation)
    }

    /// Key of the marker stating one shard was warmed.
    pub fn shard_marker_key(&self, shard: KeyRange) -> String {
        format!(
            "preload:{}:shard:{}-{}",
            self.settings.generation, shard.start, shard.end
        )
    }
}
