//! Fetch-and-reexpose collectors
//!
//! One collector runs per monitored network function. It periodically pulls
//! the function's own metrics endpoint, keeps the latest value of every
//! series, and serves them back on a dedicated port with `component_id` and
//! `nf_type` labels attached. Each collector also serves a health view, an
//! informational dashboard, a raw upstream passthrough and its own config.

mod dashboard;
mod r#loop;
mod registry;
mod server;


pub use dashboard::{nf_profile, NfProfile};
pub use r#loop::FetchLoop;
pub use registry::{SeriesRegistry, COMPONENT_ID_LABEL, NF_TYPE_LABEL};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::health::ComponentStatus;
use crate::models::NfType;
use crate::observability::MonitorMetrics;

/// Timing and binding parameters shared by every collector
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Time between upstream fetches (default: 5 seconds)
    pub fetch_interval: Duration,
    /// Per-request timeout for upstream fetches (default: 10 seconds)
    pub fetch_timeout: Duration,
    /// Age of the last success after which the collector reports unhealthy (default: 30 seconds)
    pub stale_after: Duration,
    /// How long the HTTP server may drain after cancellation (default: 5 seconds)
    pub shutdown_grace: Duration,
    /// Address the re-export endpoint binds to
    pub bind_host: IpAddr,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            fetch_interval: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

/// What a collector monitors and where it serves
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorSpec {
    pub component_name: String,
    pub nf_type: NfType,
    /// Port the re-export endpoint binds to; 0 picks an ephemeral port
    pub port: u16,
    pub upstream_address: String,
    pub upstream_port: u16,
}

impl CollectorSpec {
    pub fn upstream_url(&self) -> String {
        format!(
            "http://{}:{}/metrics",
            self.upstream_address, self.upstream_port
        )
    }
}

/// Outcome of the most recent upstream fetches
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchStatus {
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    /// Cleared by the next successful fetch
    pub last_error: Option<String>,
    pub fetch_count: u64,
    pub failure_count: u64,
    pub metrics_count: usize,
    pub series_count: usize,
}

/// Snapshot of a collector for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct CollectorRecord {
    pub component_name: String,
    pub nf_type: NfType,
    pub assigned_port: u16,
    pub upstream_address: String,
    pub upstream_port: u16,
    pub upstream_url: String,
    pub health: ComponentStatus,
    pub started_at: DateTime<Utc>,
    pub last_successful_fetch: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub fetch_count: u64,
    pub failure_count: u64,
    pub metrics_count: usize,
    pub series_count: usize,
}

/// Classify a collector from its fetch history
///
/// Healthy while fetches keep succeeding within two intervals. Unhealthy once
/// the last success (or the start, if nothing ever succeeded) is older than
/// the staleness threshold. Degraded in between.
pub fn assess_health(
    status: &FetchStatus,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    settings: &CollectorSettings,
) -> ComponentStatus {
    let reference = status.last_success.unwrap_or(started_at);
    let age = (now - reference).to_std().unwrap_or(Duration::ZERO);

    if age > settings.stale_after {
        ComponentStatus::Unhealthy
    } else if status.last_success.is_some()
        && status.last_error.is_none()
        && age <= settings.fetch_interval * 2
    {
        ComponentStatus::Healthy
    } else {
        ComponentStatus::Degraded
    }
}

/// State shared between a collector's fetch loop, its HTTP handlers and the orchestrator
#[derive(Debug)]
pub struct CollectorShared {
    pub spec: CollectorSpec,
    pub settings: CollectorSettings,
    pub started_at: DateTime<Utc>,
    status: RwLock<FetchStatus>,
}

impl CollectorShared {
    pub fn new(spec: CollectorSpec, settings: CollectorSettings) -> Self {
        Self {
            spec,
            settings,
            started_at: Utc::now(),
            status: RwLock::new(FetchStatus::default()),
        }
    }

    pub async fn status(&self) -> FetchStatus {
        self.status.read().await.clone()
    }

    pub async fn health(&self) -> ComponentStatus {
        let status = self.status.read().await;
        assess_health(&status, self.started_at, Utc::now(), &self.settings)
    }

    pub async fn record(&self) -> CollectorRecord {
        let status = self.status().await;
        let health = assess_health(&status, self.started_at, Utc::now(), &self.settings);

        CollectorRecord {
            component_name: self.spec.component_name.clone(),
            nf_type: self.spec.nf_type,
            assigned_port: self.spec.port,
            upstream_address: self.spec.upstream_address.clone(),
            upstream_port: self.spec.upstream_port,
            upstream_url: self.spec.upstream_url(),
            health,
            started_at: self.started_at,
            last_successful_fetch: status.last_success,
            last_attempt: status.last_attempt,
            last_error: status.last_error,
            fetch_count: status.fetch_count,
            failure_count: status.failure_count,
            metrics_count: status.metrics_count,
            series_count: status.series_count,
        }
    }

    pub(crate) async fn record_success(&self, metrics_count: usize, series_count: usize) {
        let now = Utc::now();
        let mut status = self.status.write().await;
        status.last_success = Some(now);
        status.last_attempt = Some(now);
        status.last_error = None;
        status.fetch_count += 1;
        status.metrics_count = metrics_count;
        status.series_count = series_count;
    }

    pub(crate) async fn record_failure(&self, error: String) {
        let mut status = self.status.write().await;
        status.last_attempt = Some(Utc::now());
        status.last_error = Some(error);
        status.fetch_count += 1;
        status.failure_count += 1;
    }
}

/// Errors raised while starting or running a collector
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("failed to bind collector port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    UpstreamStatus { url: String, status: u16 },
}

/// A started collector as seen by its owner
#[derive(Debug)]
pub struct RunningCollector {
    shared: Arc<CollectorShared>,
    local_addr: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningCollector {
    pub fn new(
        shared: Arc<CollectorShared>,
        local_addr: SocketAddr,
        token: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            shared,
            local_addr,
            token,
            task,
        }
    }

    pub fn spec(&self) -> &CollectorSpec {
        &self.shared.spec
    }

    pub fn shared(&self) -> &Arc<CollectorShared> {
        &self.shared
    }

    /// Address the re-export endpoint actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the fetch loop and the HTTP server to stop
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and hand back the task so the caller can wait for it to drain
    pub fn stop(self) -> JoinHandle<()> {
        self.token.cancel();
        self.task
    }
}

/// Starts collectors on behalf of the orchestrator
#[async_trait]
pub trait CollectorLauncher: Send + Sync {
    /// Start a collector bound to `token`; a bind failure must be returned, not logged
    async fn launch(
        &self,
        spec: CollectorSpec,
        token: CancellationToken,
    ) -> Result<RunningCollector, CollectorError>;
}

/// Launches real collectors serving HTTP
pub struct HttpCollectorLauncher {
    settings: CollectorSettings,
    metrics: MonitorMetrics,
}

impl HttpCollectorLauncher {
    pub fn new(settings: CollectorSettings, metrics: MonitorMetrics) -> Self {
        Self { settings, metrics }
    }
}

#[async_trait]
impl CollectorLauncher for HttpCollectorLauncher {
    async fn launch(
        &self,
        spec: CollectorSpec,
        token: CancellationToken,
    ) -> Result<RunningCollector, CollectorError> {
        spawn_collector(spec, self.settings.clone(), token, self.metrics.clone()).await
    }
}

/// Bind the collector's port, then spawn its fetch loop and HTTP server
pub async fn spawn_collector(
    spec: CollectorSpec,
    settings: CollectorSettings,
    token: CancellationToken,
    metrics: MonitorMetrics,
) -> Result<RunningCollector, CollectorError> {
    let listener = crate::server::bind(settings.bind_host, spec.port)
        .await
        .map_err(|source| CollectorError::Bind {
            port: spec.port,
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| CollectorError::Bind {
        port: spec.port,
        source,
    })?;

    let client = reqwest::Client::builder()
        .timeout(settings.fetch_timeout)
        .build()
        .map_err(CollectorError::Client)?;

    let grace = settings.shutdown_grace;
    let registry = Arc::new(RwLock::new(SeriesRegistry::new(
        spec.component_name.clone(),
        spec.nf_type,
    )));
    let shared = Arc::new(CollectorShared::new(spec, settings));

    let fetch_loop = FetchLoop::new(shared.clone(), registry.clone(), client.clone(), metrics);
    let router = server::router(server::CollectorState {
        shared: shared.clone(),
        registry,
        client,
    });

    let label = format!("collector-{}", shared.spec.component_name);
    let task_token = token.clone();
    let task = tokio::spawn(async move {
        let (_, served) = tokio::join!(
            fetch_loop.run(task_token.clone()),
            crate::server::serve_until_cancelled(listener, router, task_token, grace, &label),
        );
        if let Err(e) = served {
            warn!(collector = %label, error = %e, "Collector server exited with error");
        }
    });

    Ok(RunningCollector::new(shared, local_addr, token, task))
}
