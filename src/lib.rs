//! Exam Cache - cache-aside lookup service for exam results
//!
//! Serves student results from a shared cache backed by a durable row store,
//! with a coordinated one-time preload of both stores.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod preload;
pub mod service;
pub mod store;
pub mod tasks;

pub use api::{create_router, AppState};
pub use config::{Config, StoreBackend};
pub use preload::Preloader;
pub use service::LookupService;
pub use tasks::spawn_preload_task;
