//! Demo service: one user store over an in-memory backend, exposed as an
//! HTTP/JSON API with change events and Prometheus metrics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use prometheus::Registry;
use tokio::net::TcpListener;
use tracing::info;

use paged_entity_cache::backend::InMemoryBackend;
use paged_entity_cache::config::{Cli, Config};
use paged_entity_cache::metrics::CacheMetrics;
use paged_entity_cache::models::{sample_users, User};
use paged_entity_cache::server::api::{build_router, AppState};
use paged_entity_cache::store::EntityStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "paged_entity_cache=debug,tower_http=debug"
    } else {
        "paged_entity_cache=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("paged-entity-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;
    let store_config = User::store_config(config.store.clone());

    info!(
        block_size = store_config.block_size,
        max_cacheable_total = store_config.max_cacheable_total,
        max_blocks = store_config.max_blocks(),
        "Configuration loaded"
    );

    // Seed the demo backend.
    let mut backend = InMemoryBackend::new("users", config.demo.organization_id, &store_config)
        .with_items(sample_users(config.demo.seed_users));
    if config.demo.latency_ms > 0 {
        backend = backend.with_latency(Duration::from_millis(config.demo.latency_ms));
    }

    info!(
        users = config.demo.seed_users,
        organization_id = config.demo.organization_id,
        latency_ms = config.demo.latency_ms,
        "Demo backend seeded"
    );

    // Metrics and the user store.
    let registry = Registry::new();
    let metrics = Arc::new(CacheMetrics::register(&registry)?);
    let store = EntityStore::new("users", Arc::new(backend), store_config)?
        .with_metrics(metrics)
        .with_event_capacity(config.server.event_buffer);

    // Build application state.
    let state = Arc::new(AppState {
        users: store,
        registry,
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = cli.listen.unwrap_or(config.server.listen);
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
