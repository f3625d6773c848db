use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::proto::MetricFamily;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

use super::SampleCache;
use crate::exposition::{encode_text, FamilyBuilder, TEXT_CONTENT_TYPE};
use crate::models::{ContainerStats, Topology};

#[derive(Clone)]
pub(crate) struct SamplerState {
    pub cache: SampleCache,
    pub topology: watch::Receiver<Arc<Topology>>,
}

pub(crate) fn router(state: SamplerState) -> Router {
    Router::new()
        .route("/container/metrics", get(container_metrics))
        .route("/health", get(health))
        .with_state(state)
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

pub(crate) fn families(cache: &SampleCache, topology: &Topology) -> Vec<MetricFamily> {
    let mut samples: Vec<ContainerStats> = cache.iter().map(|e| e.value().clone()).collect();
    samples.sort_by(|a, b| a.name.cmp(&b.name));

    let mut cpu = FamilyBuilder::gauge("container_cpu_usage_percent", "Container CPU usage percentage");
    let mut mem = FamilyBuilder::gauge("container_memory_usage_bytes", "Container memory usage in bytes");
    let mut mem_limit =
        FamilyBuilder::gauge("container_memory_limit_bytes", "Container memory limit in bytes");
    let mut mem_pct = FamilyBuilder::gauge(
        "container_memory_usage_percent",
        "Container memory usage percentage",
    );
    let mut rx = FamilyBuilder::counter("container_network_rx_bytes", "Container network received bytes");
    let mut tx = FamilyBuilder::counter(
        "container_network_tx_bytes",
        "Container network transmitted bytes",
    );
    let mut blk_read =
        FamilyBuilder::counter("container_block_read_bytes", "Container block device read bytes");
    let mut blk_write =
        FamilyBuilder::counter("container_block_write_bytes", "Container block device write bytes");
    let mut pids = FamilyBuilder::gauge("container_pids", "Container process count");

    for stats in &samples {
        let mut labels = vec![
            ("container_name", stats.name.clone()),
            ("container_id", short_id(&stats.container_id).to_string()),
        ];
        if let Some(component) = topology.get(&stats.name) {
            labels.push(("component_type", component.component_type.clone()));
            labels.push(("deployment_type", topology.deployment_type.to_string()));
            labels.push(("component_ip", component.address.clone()));
        }

        cpu.sample(&labels, stats.cpu_percent);
        mem.sample(&labels, stats.memory_usage as f64);
        mem_limit.sample(&labels, stats.memory_limit as f64);
        mem_pct.sample(&labels, stats.memory_percent);
        rx.sample(&labels, stats.network_rx_bytes as f64);
        tx.sample(&labels, stats.network_tx_bytes as f64);
        blk_read.sample(&labels, stats.block_read as f64);
        blk_write.sample(&labels, stats.block_write as f64);
        pids.sample(&labels, stats.pids as f64);
    }

    [cpu, mem, mem_limit, mem_pct, rx, tx, blk_read, blk_write, pids]
        .into_iter()
        .filter_map(FamilyBuilder::build)
        .collect()
}

async fn container_metrics(State(state): State<SamplerState>) -> Response {
    let topology = state.topology.borrow().clone();

    match encode_text(&families(&state.cache, &topology)) {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode container metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health(State(state): State<SamplerState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
        "containers_monitored": state.cache.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposition::{parse, MetricKind};
    use crate::models::Component;
    use axum::body::Body;
    use axum::http::Request;
    use dashmap::DashMap;
    use tower::ServiceExt;

    fn state() -> SamplerState {
        let cache: SampleCache = Arc::new(DashMap::new());
        cache.insert(
            "amf".to_string(),
            ContainerStats {
                container_id: "0123456789abcdef0123".to_string(),
                name: "amf".to_string(),
                cpu_percent: 12.5,
                memory_usage: 1024,
                network_rx_bytes: 99,
                pids: 4,
                ..Default::default()
            },
        );
        let topology = Topology::from_components([Component::new(
            "amf",
            "5G-Control-Plane",
            "172.22.0.10",
            true,
        )]);
        let (_tx, rx) = watch::channel(Arc::new(topology));
        SamplerState { cache, topology: rx }
    }

    async fn body_of(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[tokio::test]
    async fn test_container_metrics_labels() {
        let (status, body) = body_of(router(state()), "/container/metrics").await;
        assert_eq!(status, StatusCode::OK);

        let parsed = parse(&body);
        let cpu = parsed
            .iter()
            .find(|m| m.name == "container_cpu_usage_percent")
            .unwrap();
        assert_eq!(cpu.kind, MetricKind::Gauge);
        assert_eq!(cpu.value, 12.5);
        assert_eq!(cpu.labels["container_name"], "amf");
        assert_eq!(cpu.labels["container_id"], "0123456789ab");
        assert_eq!(cpu.labels["component_type"], "5G-Control-Plane");
        assert_eq!(cpu.labels["deployment_type"], "5G");
        assert_eq!(cpu.labels["component_ip"], "172.22.0.10");

        let rx = parsed
            .iter()
            .find(|m| m.name == "container_network_rx_bytes")
            .unwrap();
        assert_eq!(rx.kind, MetricKind::Counter);
        assert_eq!(rx.value, 99.0);
    }

    #[tokio::test]
    async fn test_empty_cache_yields_empty_body() {
        let state = SamplerState {
            cache: Arc::new(DashMap::new()),
            topology: watch::channel(Arc::new(Topology::default())).1,
        };
        let (status, body) = body_of(router(state), "/container/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_health_counts_containers() {
        let (status, body) = body_of(router(state()), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["containers_monitored"], 1);
    }
}
