//! API Handlers
//!
//! HTTP request handlers for each lookup service endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::config::Config;
use crate::error::Result;
use crate::models::{HealthResponse, ReadyResponse, ResultRecord, StatsResponse};
use crate::preload::{PreloadSettings, Preloader};
use crate::service::{LookupService, LookupSettings, Readiness};
use crate::store::{DurableStore, ResultCache};

/// Application state shared across all handlers.
///
/// The lookup service and the preloader share the same two stores; nothing
/// else is shared.
#[derive(Clone)]
pub struct AppState {
    pub lookup: Arc<LookupService>,
    pub preloader: Arc<Preloader>,
    /// Set once the cache is known to be warm
    pub readiness: Readiness,
}

impl AppState {
    /// Creates a new AppState over the given stores.
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn ResultCache>,
        lookup: LookupSettings,
        preload: PreloadSettings,
    ) -> Self {
        Self {
            lookup: Arc::new(LookupService::new(store.clone(), cache.clone(), lookup)),
            preloader: Arc::new(Preloader::new(store, cache, preload)),
            readiness: Readiness::new(),
        }
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self::new(
            store,
            cache,
            config.lookup_settings(),
            config.preload_settings(),
        )
    }
}

/// Handler for GET /student/:student_id
///
/// Looks up one student's result through the cache.
pub async fn get_student_handler(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> Result<Json<ResultRecord>> {
    let key = state.lookup.parse_key(&student_id)?;
    let record = state.lookup.get_result(key).await?;
    Ok(Json(record))
}

/// Handler for GET /ready
///
/// 200 once the cache is warm, 503 before. A not-yet-ready instance probes
/// the preload marker so it turns ready as soon as any worker finished warming.
pub async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let generation = state.preloader.settings().generation.clone();
    if !state.readiness.is_ready() && state.preloader.is_warm().await {
        state.readiness.mark_ready();
    }

    if state.readiness.is_ready() {
        (StatusCode::OK, Json(ReadyResponse::new(true, generation)))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse::new(false, generation)),
        )
    }
}

/// Handler for GET /stats
///
/// Returns this instance's lookup counters.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(&state.lookup.stats()))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
