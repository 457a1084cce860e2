use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use flight_backend::config;
use flight_backend::module::cache::{DisabledCache, FlightCache, InMemoryCache};
use flight_backend::module::flight::{
    DisabledQueue, FlightResolver, FlightStatsExtractor, HttpFetcher, LookupOrchestrator,
    ResolverSettings, ResolverWorkerPool, TaskQueue,
};
use flight_backend::module::store::SqliteFlightStore;
use flight_backend::service::{AppState, create_app};

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::read_config()?;

    // Initialize logging
    let _logging_guard = flight_backend::logging::init_logging(
        &config.log_dir,
        "flight-backend",
        &config.log_level,
    )?;

    tracing::info!("Flight backend starting...");

    let store = Arc::new(
        SqliteFlightStore::open(&config.store.path)
            .with_context(|| format!("Failed to open flight store at {}", config.store.path))?,
    );

    let cache: Arc<dyn FlightCache> = if config.cache.enabled {
        let cache = Arc::new(InMemoryCache::new());
        cache.clone().start_purge_task(CACHE_PURGE_INTERVAL);
        cache as Arc<dyn FlightCache>
    } else {
        tracing::info!("Cache disabled, lookups go straight to the store");
        Arc::new(DisabledCache)
    };

    let fetcher =
        HttpFetcher::from_config(&config.upstream).context("Failed to build HTTP client")?;
    let resolver = Arc::new(FlightResolver::new(
        Arc::new(fetcher),
        Arc::new(FlightStatsExtractor::new()),
        store.clone(),
        cache.clone(),
        ResolverSettings::from_config(config),
    ));

    let pool = config.task_queue.enabled.then(|| {
        Arc::new(ResolverWorkerPool::start(
            resolver.clone(),
            config.task_queue.workers,
            config.task_queue.capacity,
        ))
    });
    let queue: Arc<dyn TaskQueue> = match &pool {
        Some(pool) => pool.clone() as Arc<dyn TaskQueue>,
        None => {
            tracing::info!("Task queue disabled, lookups resolve in-process");
            Arc::new(DisabledQueue)
        }
    };

    let orchestrator = Arc::new(LookupOrchestrator::new(
        cache.clone(),
        store.clone(),
        resolver,
        queue.clone(),
        config.task_queue.result_timeout(),
        config.cache.ttl(),
    ));

    let app = create_app(AppState {
        orchestrator,
        store,
        cache,
        queue,
    });

    let addr = config.server.server_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(pool) = pool {
        pool.shutdown().await;
    }
    tracing::info!("Flight backend stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
