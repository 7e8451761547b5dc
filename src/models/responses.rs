//! Response DTOs for the lookup service API
//!
//! Defines the structure of outgoing HTTP response bodies. Successful
//! lookups serialize [`ResultRecord`](super::ResultRecord) directly.

use serde::Serialize;

use crate::service::StatsSnapshot;

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that fell through to the durable store
    pub misses: u64,
    /// Misses written back to the cache
    pub fills: u64,
    /// Write-backs that failed (lookups still succeeded)
    pub fill_failures: u64,
    /// Cache reads that errored and were treated as misses
    pub cache_errors: u64,
    /// Lookups answered with not-found
    pub not_found: u64,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl StatsResponse {
    /// Creates a new StatsResponse from a counter snapshot
    pub fn new(stats: &StatsSnapshot) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            fills: stats.fills,
            fill_failures: stats.fill_failures,
            cache_errors: stats.cache_errors,
            not_found: stats.not_found,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for the readiness endpoint (GET /ready)
#[derive(Debug, Clone, Serialize)]
pub struct ReadyResponse {
    /// True once the cache is warm for this dataset generation
    pub ready: bool,
    /// Dataset generation the instance serves
    pub generation: String,
}

impl ReadyResponse {
    pub fn new(ready: bool, generation: impl Into<String>) -> Self {
        Self {
            ready,
            generation: generation.into(),
        }
    }
}
