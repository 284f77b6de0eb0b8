/// Health check endpoint
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "pool": {"active_connections": 1, "idle_connections": 4, "total_connections": 5},
///   "cache": {"hits": 10, "misses": 2, "evictions": 0, "entries": 4, "hit_rate": 0.83},
///   "telemetry": {"queued": 3, "delivered": 40, "dropped": 0, "failed_batches": 0}
/// }
/// ```

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use cardify_shared::{
    cache::CacheStats,
    db::pool::{get_pool_stats, health_check as db_health_check, PoolStats},
    telemetry::BatcherStats,
};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: &'static str,

    pub version: &'static str,

    /// `connected` or `disconnected`
    pub database: &'static str,

    pub pool: PoolStats,

    pub cache: CacheStats,

    pub telemetry: BatcherStats,
}

/// Always answers 200; a database outage shows as `degraded`
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let database = match db_health_check(&state.db).await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            "disconnected"
        }
    };

    Ok(Json(HealthResponse {
        status: if database == "connected" { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        pool: get_pool_stats(&state.db),
        cache: state.cache.stats(),
        telemetry: state.telemetry.stats(),
    }))
}
