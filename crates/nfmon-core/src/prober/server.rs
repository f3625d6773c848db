use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::proto::MetricFamily;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

use super::{ComponentHealth, HealthCache, HealthStatus, HealthSummary};
use crate::exposition::{encode_text, FamilyBuilder, TEXT_CONTENT_TYPE};
use crate::models::Topology;

#[derive(Clone)]
pub(crate) struct ProberState {
    pub cache: HealthCache,
    pub topology: watch::Receiver<Arc<Topology>>,
    pub interval: Duration,
}

pub(crate) fn router(state: ProberState) -> Router {
    Router::new()
        .route("/health/metrics", get(health_metrics))
        .route("/health/status", get(health_status))
        .route("/health", get(prober_health))
        .with_state(state)
}

fn snapshot(cache: &HealthCache) -> Vec<ComponentHealth> {
    let mut entries: Vec<ComponentHealth> = cache.iter().map(|e| e.value().clone()).collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

pub(crate) fn families(entries: &[ComponentHealth], topology: &Topology) -> Vec<MetricFamily> {
    let mut status = FamilyBuilder::gauge(
        "component_health_status",
        "Component health status (1=up, 0=down)",
    );
    let mut response_time = FamilyBuilder::gauge(
        "component_health_response_time",
        "Component health check response time in milliseconds",
    );
    let mut success_rate = FamilyBuilder::gauge(
        "component_health_success_rate",
        "Component health check success rate percentage",
    );
    let mut failures = FamilyBuilder::gauge(
        "component_health_consecutive_failures",
        "Number of consecutive health check failures",
    );
    let mut total = FamilyBuilder::counter(
        "component_health_total_checks",
        "Total number of health checks performed",
    );

    // unknown components were never probed
    for health in entries.iter().filter(|h| h.total_checks > 0) {
        let mut labels = vec![
            ("component_name", health.name.clone()),
            ("component_id", health.component_id.clone()),
            (
                "check_type",
                health
                    .check_type
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            ),
            ("endpoint", health.endpoint.clone()),
        ];
        if let Some(component) = topology.get(&health.component_id) {
            labels.push(("component_type", component.component_type.clone()));
            labels.push(("deployment_type", topology.deployment_type.to_string()));
        }

        let up = if health.status == HealthStatus::Up { 1.0 } else { 0.0 };
        status.sample(&labels, up);
        response_time.sample(&labels, health.response_time_ms);
        success_rate.sample(&labels, health.success_rate);
        failures.sample(&labels, f64::from(health.consecutive_failures));
        total.sample(&labels, health.total_checks as f64);
    }

    [status, response_time, success_rate, failures, total]
        .into_iter()
        .filter_map(FamilyBuilder::build)
        .collect()
}

async fn health_metrics(State(state): State<ProberState>) -> Response {
    let topology = state.topology.borrow().clone();
    let entries = snapshot(&state.cache);

    match encode_text(&families(&entries, &topology)) {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode health metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Serialize)]
struct StatusBody {
    timestamp: i64,
    components: BTreeMap<String, ComponentHealth>,
    summary: HealthSummary,
}

async fn health_status(State(state): State<ProberState>) -> Json<StatusBody> {
    let entries = snapshot(&state.cache);
    let summary = HealthSummary::compute(&entries);

    Json(StatusBody {
        timestamp: chrono::Utc::now().timestamp(),
        components: entries
            .into_iter()
            .map(|h| (h.component_id.clone(), h))
            .collect(),
        summary,
    })
}

async fn prober_health(State(state): State<ProberState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
        "components_monitored": state.cache.len(),
        "check_interval_seconds": state.interval.as_secs_f64(),
    }))
}
