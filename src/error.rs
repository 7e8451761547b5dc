//! Error types for the lookup service and the preloader
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::{KeyRange, StudentKey};

// == Store Error ==
/// Error raised by a store adapter call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The caller-supplied deadline passed before the call finished
    #[error("deadline exceeded")]
    Timeout,

    /// Pool exhausted or connection could not be established
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected or failed the command
    #[error("store backend error: {0}")]
    Backend(String),

    /// Stored data could not be decoded
    #[error("corrupt entry for key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// Returns true if the adapter may retry the call before the deadline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Result type for store adapter calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// == Conversions From Backend Errors ==
impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            StoreError::Unavailable(format!("database connection closed: {}", err))
        } else {
            StoreError::Backend(format!("database error: {}", err))
        }
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Backend(e) => StoreError::from(e),
            other => StoreError::Unavailable(format!("database pool: {}", other)),
        }
    }
}

impl From<deadpool_redis::redis::RedisError> for StoreError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Unavailable(format!("cache connection: {}", err))
        } else {
            StoreError::Backend(format!("cache error: {}", err))
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        match err {
            deadpool_redis::PoolError::Backend(e) => StoreError::from(e),
            other => StoreError::Unavailable(format!("cache pool: {}", other)),
        }
    }
}

// == Lookup Error ==
/// Errors visible to lookup clients.
#[derive(Error, Debug)]
pub enum LookupError {
    /// Malformed or out-of-range student id; no I/O attempted
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The durable store has no row for the key
    #[error("Student not found: {0}")]
    NotFound(StudentKey),

    /// Deadline exceeded on a durable store call
    #[error("Timed out reading student results")]
    Timeout,

    /// Durable store pool exhausted or unreachable
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for LookupError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout => LookupError::Timeout,
            other => LookupError::StoreUnavailable(other.to_string()),
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        let status = match &self {
            LookupError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            LookupError::NotFound(_) => StatusCode::NOT_FOUND,
            LookupError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            LookupError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for lookups.
pub type Result<T> = std::result::Result<T, LookupError>;

// == Preload Errors ==
/// A seed batch that could not be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Keys of the failed batch; re-seed this range to resume
    pub range: KeyRange,
    pub cause: StoreError,
}

/// Seeding failed for more batches than the failure tolerance allows.
///
/// Batches not listed in `failed` stay committed.
#[derive(Error, Debug, Clone)]
#[error("partial seed failure: {} of {attempted} batches failed, {inserted} rows committed", .failed.len())]
pub struct SeedError {
    pub inserted: u64,
    pub attempted: usize,
    pub failed: Vec<BatchFailure>,
}

/// A warm shard that did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
    pub shard: KeyRange,
    pub cause: StoreError,
}

/// Warming failed for more shards than the failure tolerance allows.
///
/// The preload marker is not set.
#[derive(Error, Debug, Clone)]
#[error("partial warm failure: {} shards failed, {records} records warmed", .failed_shards.len())]
pub struct WarmError {
    pub records: u64,
    pub failed_shards: Vec<ShardFailure>,
}

// == Config Error ==
/// Invalid configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
