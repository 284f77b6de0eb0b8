//! # Cardify API Server
//!
//! Serves the business card REST API.
//!
//! ## Startup
//!
//! 1. Load configuration from the environment
//! 2. Connect to PostgreSQL and run migrations
//! 3. Attach Redis as the persistent cache tier when `REDIS_URL` is set
//! 4. Start the cache sweeper and the telemetry flusher
//! 5. Serve until Ctrl-C, then flush pending telemetry
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p cardify-api
//! ```

use cardify_api::{
    app::{build_router, cache_config, AppState},
    config::Config,
};
use cardify_shared::{
    cache::{CacheManager, RedisStore},
    db::{
        migrations::{get_migration_status, run_migrations},
        pool,
    },
    redis::{sanitize_url, RedisClient, RedisConfig},
    telemetry::PgEventSink,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cardify_api=debug,cardify_shared=info,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Memory-only cache unless Redis is configured and reachable
async fn build_cache(config: &Config) -> CacheManager {
    let settings = cache_config(config);

    let Some(url) = config.cache.redis_url.as_deref() else {
        tracing::info!("REDIS_URL not set, cache is memory only");
        return CacheManager::new(settings);
    };

    match RedisClient::new(RedisConfig::new(url)).await {
        Ok(client) => {
            tracing::info!(redis = %sanitize_url(url), "Persistent cache tier enabled");
            CacheManager::with_persistent(settings, Arc::new(RedisStore::new(client)))
        }
        Err(e) => {
            tracing::warn!(redis = %sanitize_url(url), error = %e, "Redis unavailable, cache is memory only");
            CacheManager::new(settings)
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Cardify API Server v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let db = pool::create_pool(pool::DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        ..pool::DatabaseConfig::default()
    })
    .await?;
    run_migrations(&db).await?;
    let schema = get_migration_status(&db).await?;
    tracing::info!(
        applied = schema.applied_migrations,
        latest = ?schema.latest_version,
        "Database schema ready"
    );

    let cache = build_cache(&config).await;
    let addr: SocketAddr = config.bind_address().parse()?;
    let state = AppState::with_cache(db.clone(), config, cache);

    let cancel = CancellationToken::new();
    let sweeper = state.cache.spawn_cleanup(CACHE_SWEEP_INTERVAL, cancel.clone());
    let flusher = state
        .telemetry
        .spawn(Arc::new(PgEventSink::new(db.clone())), cancel.clone());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // Serve can also end on an error path; make sure the tasks stop
    cancel.cancel();
    if let Err(e) = flusher.await {
        tracing::error!(error = %e, "Telemetry flusher panicked");
    }
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Cache sweeper panicked");
    }

    pool::close_pool(db).await;
    tracing::info!("Shutdown complete");

    Ok(())
}
