//! API Module
//!
//! HTTP handlers and routing for the lookup service REST API.
//!
//! # Endpoints
//! - `GET /student/:student_id` - Result for one student
//! - `GET /ready` - Readiness probe
//! - `GET /stats` - Lookup statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
