//! HTTP API for health checks, Prometheus metrics and pool management

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use dynpool_lib::{
    notifier::FieldChange, ComponentStatus, ConfigRefresher, HealthRegistry, PoolConfig,
    PoolConfigUpdate, PoolHolder, PoolMetrics, PoolRegistry, PoolStats, RefreshError,
    RefreshOutcome,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: PoolMetrics,
    pub registry: Arc<PoolRegistry>,
    pub refresher: Arc<ConfigRefresher>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: PoolMetrics,
        registry: Arc<PoolRegistry>,
        refresher: Arc<ConfigRefresher>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            registry,
            refresher,
        }
    }
}

/// One pool in a listing
#[derive(Debug, Serialize, Deserialize)]
pub struct PoolSummary {
    pub pool_id: String,
    pub stats: Option<PoolStats>,
    /// Set when stats could not be read, e.g. after termination
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PoolListResponse {
    pub pools: Vec<PoolSummary>,
    pub total: usize,
}

/// Declared configuration plus live stats of one pool
#[derive(Debug, Serialize, Deserialize)]
pub struct PoolDetailResponse {
    pub config: PoolConfig,
    pub stats: Option<PoolStats>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub pool_id: String,
    /// `applied` or `unchanged`
    pub outcome: String,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

fn snapshot(holder: &PoolHolder) -> (Option<PoolStats>, Option<String>) {
    match holder.pool.stats() {
        Ok(stats) => (Some(stats), None),
        Err(e) => (None, Some(e.to_string())),
    }
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once the pools are built
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    // Scrapes see current sizes even between monitor runs
    for holder in state.registry.list_all() {
        if let Ok(stats) = holder.pool.stats() {
            state.metrics.record_pool(&stats);
        }
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn list_pools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut pools: Vec<PoolSummary> = state
        .registry
        .list_all()
        .iter()
        .map(|holder| {
            let (stats, error) = snapshot(holder);
            PoolSummary {
                pool_id: holder.pool_id.clone(),
                stats,
                error,
            }
        })
        .collect();
    pools.sort_by(|a, b| a.pool_id.cmp(&b.pool_id));

    let total = pools.len();
    Json(PoolListResponse { pools, total })
}

async fn get_pool(State(state): State<Arc<AppState>>, Path(pool_id): Path<String>) -> Response {
    let Some(holder) = state.registry.get(&pool_id) else {
        return error_response(StatusCode::NOT_FOUND, format!("pool {} not found", pool_id));
    };

    let (stats, error) = snapshot(&holder);
    Json(PoolDetailResponse {
        config: holder.config,
        stats,
        error,
    })
    .into_response()
}

/// Apply a partial configuration to one pool; the path id wins over the body
async fn update_pool(
    State(state): State<Arc<AppState>>,
    Path(pool_id): Path<String>,
    Json(mut update): Json<PoolConfigUpdate>,
) -> Response {
    update.pool_id = pool_id.clone();
    info!(pool_id = %pool_id, "Configuration update received over API");

    match state.refresher.apply_config(update).await {
        Ok(RefreshOutcome::Applied(event)) => Json(RefreshResponse {
            pool_id,
            outcome: "applied".to_string(),
            changes: event.changes,
        })
        .into_response(),
        Ok(RefreshOutcome::Unchanged) => Json(RefreshResponse {
            pool_id,
            outcome: "unchanged".to_string(),
            changes: Vec::new(),
        })
        .into_response(),
        Ok(RefreshOutcome::UnknownPool) => {
            error_response(StatusCode::NOT_FOUND, format!("pool {} not found", pool_id))
        }
        Err(e @ RefreshError::InvalidConfig { .. }) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e @ RefreshError::Apply { .. }) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/pools", get(list_pools))
        .route("/api/v1/pools/:pool_id", get(get_pool))
        .route("/api/v1/pools/:pool_id/config", put(update_pool))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
