//! Exam Cache - cache-aside lookup service for exam results
//!
//! Binary entry point: loads configuration, connects the stores, starts the
//! preload task and serves the HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exam_cache::store::{
    Deadline, DurableStore, MemoryCache, MemoryStore, PgStore, RedisCache, ResultCache,
};
use exam_cache::tasks::StartupOptions;
use exam_cache::{create_router, spawn_preload_task, AppState, Config, StoreBackend};

/// Main entry point for the exam results lookup service.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Connect the durable store and the cache
/// 4. Start the background preload task
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exam_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting exam results lookup service");

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        "Configuration loaded: keys={}, backend={:?}, workers={}, shards={}, generation={}, port={}",
        config.key_range(),
        config.store_backend,
        config.worker_count,
        config.shard_count,
        config.dataset_generation,
        config.server_port
    );

    let (store, cache) = connect_stores(&config).await?;
    let state = AppState::from_config(&config, store, cache);

    let preload_handle = spawn_preload_task(
        state.preloader.clone(),
        state.readiness.clone(),
        StartupOptions::from_config(&config),
    );
    info!("Background preload task started");

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(preload_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Builds the configured store pair.
async fn connect_stores(
    config: &Config,
) -> anyhow::Result<(Arc<dyn DurableStore>, Arc<dyn ResultCache>)> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("Using in-memory stores; state is not shared with other instances");
            Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryCache::new())))
        }
        StoreBackend::Postgres => {
            let retry = config.retry_policy();
            let store = PgStore::from_config(&config.pg_config(), retry)
                .context("failed to create database pool")?;
            store
                .ensure_schema(Deadline::after(config.bulk_call_timeout))
                .await
                .context("failed to prepare database schema")?;
            let cache = RedisCache::from_config(&config.redis_config(), retry)
                .context("failed to create cache pool")?;
            info!(
                "Connected to PostgreSQL at {}:{} and Redis at {}",
                config.db_host, config.db_port, config.redis_url
            );
            Ok((Arc::new(store), Arc::new(cache)))
        }
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the preload task and allows graceful shutdown.
async fn shutdown_signal(preload_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    preload_handle.abort();
    warn!("Preload task aborted");
}
