//! API Routes
//!
//! Configures the Axum router with all lookup service endpoints.

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    get_student_handler, health_handler, ready_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /student/:student_id` - Result for one student
/// - `GET /ready` - Readiness probe for the load balancer
/// - `GET /stats` - Lookup statistics for this instance
/// - `GET /health` - Liveness probe
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/student/:student_id", get(get_student_handler))
        .route("/ready", get(ready_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
