//! Admin HTTP API: health, readiness, self-metrics and orchestrator status

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use nfmon_core::{
    exposition::TEXT_CONTENT_TYPE,
    health::{ComponentStatus, HealthRegistry},
    observability::MonitorMetrics,
    orchestrator::Orchestrator,
    server,
};
use prometheus::{Encoder, TextEncoder};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: MonitorMetrics,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: MonitorMetrics,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            orchestrator,
        }
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

/// Readiness check response - returns 200 if ready, 503 if not ready
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
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode self-metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
        buffer,
    )
        .into_response()
}

/// Collector table, topology counts and validation issues
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.status().await)
}

/// Scrape jobs as they would be written to the generated config
async fn targets(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.scrape_targets().await)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/targets", get(targets))
        .with_state(state)
}

/// Serve the API until `token` is cancelled
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    token: CancellationToken,
    grace: Duration,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = server::bind(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port).await?;
    info!(addr = %listener.local_addr()?, "Starting API server");

    server::serve_until_cancelled(listener, app, token, grace, "api").await?;

    Ok(())
}
