//! Upstream fetch loop
//!
//! Pulls the upstream metrics endpoint once immediately and then on every
//! interval tick, folding each payload into the collector's series registry.

use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CollectorError, CollectorShared, SeriesRegistry};
use crate::exposition::parse;
use crate::observability::MonitorMetrics;

/// Periodic fetcher for one collector
pub struct FetchLoop {
    shared: Arc<CollectorShared>,
    registry: Arc<RwLock<SeriesRegistry>>,
    client: reqwest::Client,
    metrics: MonitorMetrics,
}

impl FetchLoop {
    pub fn new(
        shared: Arc<CollectorShared>,
        registry: Arc<RwLock<SeriesRegistry>>,
        client: reqwest::Client,
        metrics: MonitorMetrics,
    ) -> Self {
        Self {
            shared,
            registry,
            client,
            metrics,
        }
    }

    /// Run until `token` is cancelled; an in-flight fetch is abandoned on cancellation
    pub async fn run(self, token: CancellationToken) {
        let spec = &self.shared.spec;
        info!(
            component = %spec.component_name,
            nf_type = %spec.nf_type,
            upstream = %spec.upstream_url(),
            interval_secs = self.shared.settings.fetch_interval.as_secs_f64(),
            "Starting fetch loop"
        );

        let mut ticker = interval(self.shared.settings.fetch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.fetch_once() => {}
            }
        }

        info!(component = %spec.component_name, "Fetch loop stopped");
    }

    /// Fetch and ingest one payload, returning the number of samples parsed
    pub async fn fetch_once(&self) -> Result<usize, CollectorError> {
        let start = Instant::now();
        let result = fetch_text(&self.client, &self.shared.spec.upstream_url()).await;
        self.metrics
            .observe_fetch_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(body) => {
                let parsed = parse(&body);
                let (families, series) = {
                    let mut registry = self.registry.write().await;
                    registry.ingest(&parsed);
                    (registry.family_count(), registry.series_count())
                };
                self.shared.record_success(families, series).await;

                debug!(
                    component = %self.shared.spec.component_name,
                    samples = parsed.len(),
                    families = families,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Fetched upstream metrics"
                );
                Ok(parsed.len())
            }
            Err(e) => {
                self.metrics.inc_fetch_errors();
                self.shared.record_failure(e.to_string()).await;
                warn!(
                    component = %self.shared.spec.component_name,
                    error = %e,
                    "Upstream fetch failed"
                );
                Err(e)
            }
        }
    }
}

/// GET `url` and return the body of a 2xx response
pub(crate) async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, CollectorError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| CollectorError::Fetch {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(CollectorError::UpstreamStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|source| CollectorError::Fetch {
        url: url.to_string(),
        source,
    })
}
