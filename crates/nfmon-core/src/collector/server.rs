//! HTTP endpoints of a single collector

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use super::{nf_profile, CollectorRecord, CollectorShared, NfProfile, SeriesRegistry};
use crate::exposition::TEXT_CONTENT_TYPE;
use crate::health::ComponentStatus;
use crate::models::NfType;

#[derive(Clone)]
pub(crate) struct CollectorState {
    pub shared: Arc<CollectorShared>,
    pub registry: Arc<RwLock<SeriesRegistry>>,
    pub client: reqwest::Client,
}

pub(crate) fn router(state: CollectorState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/dashboard", get(dashboard))
        .route("/debug/raw", get(debug_raw))
        .route("/config", get(config))
        .with_state(state)
}

async fn metrics(State(state): State<CollectorState>) -> Response {
    let encoded = state.registry.read().await.encode();

    match encoded {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            warn!(
                component = %state.shared.spec.component_name,
                error = %e,
                "Failed to encode re-exposed metrics"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: ComponentStatus,
    nf_type: NfType,
    component: String,
    upstream: String,
    last_update: Option<DateTime<Utc>>,
    last_fetch_error: Option<String>,
    metrics_count: usize,
    series_count: usize,
    fetch_count: u64,
    failure_count: u64,
}

async fn health(State(state): State<CollectorState>) -> (StatusCode, Json<HealthBody>) {
    let record: CollectorRecord = state.shared.record().await;
    let code = match record.health {
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    let body = HealthBody {
        status: record.health,
        nf_type: record.nf_type,
        component: record.component_name,
        upstream: record.upstream_url,
        last_update: record.last_successful_fetch,
        last_fetch_error: record.last_error,
        metrics_count: record.metrics_count,
        series_count: record.series_count,
        fetch_count: record.fetch_count,
        failure_count: record.failure_count,
    };
    (code, Json(body))
}

#[derive(Debug, Serialize)]
struct RealTimeStatus {
    health: ComponentStatus,
    metrics_count: usize,
    series_count: usize,
    last_update: Option<DateTime<Utc>>,
    last_error: Option<String>,
    uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
struct Endpoints {
    metrics: &'static str,
    health: &'static str,
    raw: &'static str,
    config: &'static str,
}

#[derive(Debug, Serialize)]
struct DashboardResponse {
    component_id: String,
    nf_type: NfType,
    profile: NfProfile,
    real_time_status: RealTimeStatus,
    endpoints: Endpoints,
}

async fn dashboard(State(state): State<CollectorState>) -> Json<DashboardResponse> {
    let record = state.shared.record().await;

    Json(DashboardResponse {
        component_id: record.component_name,
        nf_type: record.nf_type,
        profile: nf_profile(record.nf_type),
        real_time_status: RealTimeStatus {
            health: record.health,
            metrics_count: record.metrics_count,
            series_count: record.series_count,
            last_update: record.last_successful_fetch,
            last_error: record.last_error,
            uptime_seconds: (Utc::now() - record.started_at).num_seconds(),
        },
        endpoints: Endpoints {
            metrics: "/metrics",
            health: "/health",
            raw: "/debug/raw",
            config: "/config",
        },
    })
}

/// Pass the upstream payload through untouched
async fn debug_raw(State(state): State<CollectorState>) -> Response {
    let url = state.shared.spec.upstream_url();

    let response = match state.client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            return (
                StatusCode::BAD_GATEWAY,
                format!("failed to reach upstream {}: {}", url, e),
            )
                .into_response()
        }
    };

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    match response.text().await {
        Ok(body) => (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body)
            .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            format!("failed to read upstream body from {}: {}", url, e),
        )
            .into_response(),
    }
}

#[derive(Debug, Serialize)]
struct ConfigResponse {
    component_id: String,
    nf_type: NfType,
    port: u16,
    upstream_url: String,
    fetch_interval_secs: f64,
    fetch_timeout_secs: f64,
    stale_after_secs: f64,
    started_at: DateTime<Utc>,
}

async fn config(State(state): State<CollectorState>) -> Json<ConfigResponse> {
    let shared = &state.shared;

    Json(ConfigResponse {
        component_id: shared.spec.component_name.clone(),
        nf_type: shared.spec.nf_type,
        port: shared.spec.port,
        upstream_url: shared.spec.upstream_url(),
        fetch_interval_secs: shared.settings.fetch_interval.as_secs_f64(),
        fetch_timeout_secs: shared.settings.fetch_timeout.as_secs_f64(),
        stale_after_secs: shared.settings.stale_after.as_secs_f64(),
        started_at: shared.started_at,
    })
}
