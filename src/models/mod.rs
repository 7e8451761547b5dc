//! Domain records and response models
//!
//! This module defines the result record with its cache codec, and the
//! DTOs used for serializing HTTP response bodies.

pub mod record;
pub mod responses;

// Re-export commonly used types
pub use record::{
    CachedValue, Computed, Division, Fields, KeyRange, RecordBatch, ResultRecord, ResultStatus,
    Scores, Stream, StudentKey,
};
pub use responses::{HealthResponse, ReadyResponse, StatsResponse};
