//! Lookup Statistics Module
//!
//! Per-instance lookup counters. Each instance counts only its own traffic,
//! so nothing here is shared between replicas.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Lookup Stats ==
/// Lock-free lookup counters updated on the request path.
#[derive(Debug, Default)]
pub struct LookupStats {
    hits: AtomicU64,
    misses: AtomicU64,
    fills: AtomicU64,
    fill_failures: AtomicU64,
    cache_errors: AtomicU64,
    not_found: AtomicU64,
}

impl LookupStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fill(&self) {
        self.fills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fill_failure(&self) {
        self.fill_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Reads every counter. Counters are read independently, not atomically as a set.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fills: self.fills.load(Ordering::Relaxed),
            fill_failures: self.fill_failures.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`LookupStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that went to the durable store
    pub misses: u64,
    /// Successful write-backs after a miss
    pub fills: u64,
    /// Failed write-backs
    pub fill_failures: u64,
    /// Cache reads that failed or returned undecodable data
    pub cache_errors: u64,
    /// Lookups answered with not-found
    pub not_found: u64,
}

impl StatsSnapshot {
    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
