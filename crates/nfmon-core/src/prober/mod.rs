//! Component health prober
//!
//! Probes every running component on a fixed interval with a check derived
//! from its name, and keeps per-component health history in a shared cache.

pub mod check;
mod server;

pub use check::{CheckConfig, CheckPolicy, CheckType, ProbeError};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::health::{components, HealthRegistry};
use crate::models::Topology;
use crate::observability::MonitorMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
    Degraded,
    Unknown,
}

/// Result of a single probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub status: HealthStatus,
    pub response_time_ms: f64,
    pub error: Option<String>,
}

impl ProbeResult {
    fn is_failure(&self) -> bool {
        matches!(self.status, HealthStatus::Down | HealthStatus::Degraded)
    }
}

/// Health history of one component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub component_id: String,
    pub name: String,
    pub status: HealthStatus,
    pub response_time_ms: f64,
    pub last_check: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_type: Option<CheckType>,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub success_rate: f64,
}

impl ComponentHealth {
    /// A component with nothing to probe
    pub fn unknown(name: &str) -> Self {
        Self {
            component_id: name.to_string(),
            name: name.to_string(),
            status: HealthStatus::Unknown,
            response_time_ms: 0.0,
            last_check: 0,
            error_message: None,
            endpoint: String::new(),
            check_type: None,
            consecutive_failures: 0,
            total_checks: 0,
            successful_checks: 0,
            success_rate: 0.0,
        }
    }

    /// Fold a probe result into the history
    pub fn record(&mut self, config: &CheckConfig, result: ProbeResult, now: i64) {
        self.total_checks += 1;
        if result.is_failure() {
            self.consecutive_failures += 1;
        } else {
            self.successful_checks += 1;
            self.consecutive_failures = 0;
        }
        self.success_rate = self.successful_checks as f64 / self.total_checks as f64 * 100.0;

        self.status = result.status;
        self.response_time_ms = result.response_time_ms;
        self.error_message = result.error;
        self.last_check = now;
        self.endpoint = config.endpoint.clone();
        self.check_type = Some(config.check_type);
    }
}

/// Aggregate over the health cache
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub up: usize,
    pub down: usize,
    pub degraded: usize,
    pub unknown: usize,
    pub health_percentage: f64,
    pub avg_response_time_ms: f64,
}

impl HealthSummary {
    pub fn compute<'a>(entries: impl IntoIterator<Item = &'a ComponentHealth>) -> Self {
        let mut summary = HealthSummary::default();
        let mut response_total = 0.0;
        let mut checked = 0usize;

        for health in entries {
            summary.total += 1;
            match health.status {
                HealthStatus::Up => summary.up += 1,
                HealthStatus::Down => summary.down += 1,
                HealthStatus::Degraded => summary.degraded += 1,
                HealthStatus::Unknown => summary.unknown += 1,
            }
            if health.total_checks > 0 {
                response_total += health.response_time_ms;
                checked += 1;
            }
        }

        if summary.total > 0 {
            summary.health_percentage = summary.up as f64 / summary.total as f64 * 100.0;
        }
        if checked > 0 {
            summary.avg_response_time_ms = response_total / checked as f64;
        }
        summary
    }
}

#[derive(Debug, Clone)]
pub struct ProberSettings {
    /// Time between sweeps (default: 15 seconds)
    pub interval: Duration,
    pub port: u16,
    pub bind_host: IpAddr,
    pub shutdown_grace: Duration,
    pub policy: CheckPolicy,
}

impl Default for ProberSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            port: 8081,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            shutdown_grace: Duration::from_secs(5),
            policy: CheckPolicy::default(),
        }
    }
}

/// Per-component health, keyed by component name
pub type HealthCache = Arc<DashMap<String, ComponentHealth>>;

pub struct HealthProber {
    topology: watch::Receiver<Arc<Topology>>,
    settings: ProberSettings,
    client: reqwest::Client,
    cache: HealthCache,
    metrics: MonitorMetrics,
}

impl HealthProber {
    pub fn new(
        topology: watch::Receiver<Arc<Topology>>,
        settings: ProberSettings,
        metrics: MonitorMetrics,
    ) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(settings.policy.timeout)
            .build()?;

        Ok(Self {
            topology,
            settings,
            client,
            cache: Arc::new(DashMap::new()),
            metrics,
        })
    }

    pub fn cache(&self) -> HealthCache {
        self.cache.clone()
    }

    /// Probe every running component concurrently; returns the number probed
    pub async fn sweep(&self) -> usize {
        let topology = self.topology.borrow().clone();

        let running: HashSet<&str> = topology.running().map(|c| c.name.as_str()).collect();
        self.cache.retain(|name, _| running.contains(name.as_str()));

        let mut checks = Vec::new();
        for component in topology.running() {
            match self.settings.policy.derive(component) {
                Some(config) => checks.push(config),
                None => {
                    self.cache
                        .entry(component.name.clone())
                        .or_insert_with(|| ComponentHealth::unknown(&component.name));
                }
            }
        }

        let results = futures::future::join_all(
            checks
                .iter()
                .map(|config| probe(&self.client, config)),
        )
        .await;

        let now = Utc::now().timestamp();
        for (config, result) in checks.iter().zip(results) {
            self.metrics
                .observe_probe_latency(result.response_time_ms / 1000.0);
            if result.is_failure() {
                self.metrics.inc_probe_failures();
                debug!(
                    component = %config.component,
                    endpoint = %config.endpoint,
                    status = ?result.status,
                    error = ?result.error,
                    "Probe failed"
                );
            }

            self.cache
                .entry(config.component.clone())
                .or_insert_with(|| ComponentHealth::unknown(&config.component))
                .record(config, result, now);
        }

        checks.len()
    }

    pub fn summary(&self) -> HealthSummary {
        let entries: Vec<ComponentHealth> = self.cache.iter().map(|e| e.value().clone()).collect();
        HealthSummary::compute(&entries)
    }

    /// Probe once immediately, then every interval, until cancelled
    pub async fn run(self, token: CancellationToken, health: HealthRegistry) {
        info!(
            interval_secs = self.settings.interval.as_secs_f64(),
            "Starting health prober"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = token.cancelled() => break,
                probed = self.sweep() => {
                    debug!(components = probed, "Probe sweep complete");
                    health.set_healthy(components::HEALTH_PROBER).await;
                }
            }
        }

        info!("Health prober stopped");
    }

    /// Bind the HTTP port, then run the probe loop and the server until cancelled
    pub async fn spawn(
        self,
        token: CancellationToken,
        health: HealthRegistry,
    ) -> Result<JoinHandle<()>, ProbeError> {
        let port = self.settings.port;
        let listener = crate::server::bind(self.settings.bind_host, port)
            .await
            .map_err(|source| ProbeError::Bind { port, source })?;

        let grace = self.settings.shutdown_grace;
        let router = server::router(server::ProberState {
            cache: self.cache.clone(),
            topology: self.topology.clone(),
            interval: self.settings.interval,
        });

        Ok(tokio::spawn(async move {
            let (_, served) = tokio::join!(
                self.run(token.clone(), health),
                crate::server::serve_until_cancelled(listener, router, token, grace, "prober"),
            );
            if let Err(e) = served {
                warn!(error = %e, "Prober server exited with error");
            }
        }))
    }
}

/// Run one check and time it
pub async fn probe(client: &reqwest::Client, config: &CheckConfig) -> ProbeResult {
    let started = Instant::now();
    let outcome = check::execute(client, config).await;
    let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    match outcome {
        Ok(()) => ProbeResult {
            status: HealthStatus::Up,
            response_time_ms,
            error: None,
        },
        Err(e) => ProbeResult {
            status: if e.is_degraded() {
                HealthStatus::Degraded
            } else {
                HealthStatus::Down
            },
            response_time_ms,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Component;

    fn tcp_config(endpoint: &str) -> CheckConfig {
        CheckConfig {
            component: "mongo".to_string(),
            check_type: CheckType::Tcp,
            endpoint: endpoint.to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    fn result(status: HealthStatus) -> ProbeResult {
        ProbeResult {
            status,
            response_time_ms: 2.0,
            error: None,
        }
    }

    #[test]
    fn test_success_rate_and_consecutive_failures() {
        let config = tcp_config("10.0.0.1:27017");
        let mut health = ComponentHealth::unknown("mongo");

        let sequence = [
            HealthStatus::Up,
            HealthStatus::Down,
            HealthStatus::Degraded,
            HealthStatus::Up,
            HealthStatus::Down,
        ];
        for status in sequence {
            health.record(&config, result(status), 100);
        }

        // 5 probes, 3 failures
        assert_eq!(health.total_checks, 5);
        assert_eq!(health.successful_checks, 2);
        assert!((health.success_rate - 40.0).abs() < 1e-9);
        assert_eq!(health.consecutive_failures, 1);
        assert_eq!(health.status, HealthStatus::Down);
        assert_eq!(health.check_type, Some(CheckType::Tcp));

        health.record(&config, result(HealthStatus::Up), 101);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.last_check, 101);
    }

    #[test]
    fn test_summary_counts() {
        let config = tcp_config("10.0.0.1:1");
        let mut up = ComponentHealth::unknown("amf");
        up.record(&config, result(HealthStatus::Up), 1);
        let mut down = ComponentHealth::unknown("smf");
        down.record(
            &config,
            ProbeResult {
                response_time_ms: 6.0,
                ..result(HealthStatus::Down)
            },
            1,
        );
        let unknown = ComponentHealth::unknown("srsue");

        let summary = HealthSummary::compute([&up, &down, &unknown]);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.up, 1);
        assert_eq!(summary.down, 1);
        assert_eq!(summary.unknown, 1);
        assert!((summary.health_percentage - 100.0 / 3.0).abs() < 1e-9);
        assert!((summary.avg_response_time_ms - 4.0).abs() < 1e-9);

        assert_eq!(HealthSummary::compute(Vec::<&ComponentHealth>::new()).health_percentage, 0.0);
    }

    #[tokio::test]
    async fn test_sweep_probes_and_purges() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let topology = Topology::from_components([
            Component::new("mongo", "Database", "127.0.0.1", true).with_ports([port]),
            Component::new("srsue", "User-Equipment", "127.0.0.1", true),
        ]);
        let (tx, rx) = watch::channel(Arc::new(topology));
        let prober =
            HealthProber::new(rx, ProberSettings::default(), MonitorMetrics::new()).unwrap();

        assert_eq!(prober.sweep().await, 1);
        let cache = prober.cache();
        assert_eq!(cache.get("mongo").unwrap().status, HealthStatus::Up);
        assert_eq!(cache.get("srsue").unwrap().status, HealthStatus::Unknown);
        assert_eq!(prober.summary().up, 1);

        tx.send_replace(Arc::new(Topology::from_components([Component::new(
            "mongo", "Database", "127.0.0.1", false,
        )])));
        assert_eq!(prober.sweep().await, 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_component_is_down() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = probe(&reqwest::Client::new(), &tcp_config(&endpoint)).await;

        assert_eq!(result.status, HealthStatus::Down);
        assert!(result.error.unwrap().contains("TCP connection"));
        assert!(result.response_time_ms >= 0.0);
    }
}
