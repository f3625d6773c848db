//! Collector lifecycle orchestration
//!
//! Keeps exactly one fetch-and-reexpose collector alive for every running
//! component that classifies as a network function. Each reconcile pass
//! computes the required set from a topology snapshot, cancels collectors that
//! are no longer required, and starts the missing ones on free ports.
//! Collectors are never modified in place: any change is a stop plus a start.

mod classify;
mod scrape_config;

#[cfg(test)]
mod tests;

pub use classify::{NameClassifier, NfClassifier};
pub use scrape_config::{
    format_interval, render, sources, write_atomically, ScrapeSettings, ScrapeTarget,
};

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::{CollectorLauncher, CollectorRecord, CollectorSpec, RunningCollector};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{DeploymentType, NfType, Topology};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::topology::TopologySource;

/// Network functions every 5G deployment is expected to run
const EXPECTED_NFS: [NfType; 3] = [NfType::Amf, NfType::Smf, NfType::Upf];

/// Orchestrator parameters
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Port the network functions serve their own metrics on (default: 9090)
    pub upstream_metrics_port: u16,
    /// Upper bound on waiting for stopped collectors to drain (default: 6 seconds)
    pub stop_grace: Duration,
    pub scrape: ScrapeSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            upstream_metrics_port: 9090,
            stop_grace: Duration::from_secs(6),
            scrape: ScrapeSettings::default(),
        }
    }
}

/// What a reconcile pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    /// Components whose collector could not be started; retried next pass
    pub failed: Vec<String>,
}

impl ReconcileOutcome {
    /// True when the set of live collectors changed
    pub fn changed(&self) -> bool {
        !self.started.is_empty() || !self.stopped.is_empty()
    }
}

/// A collector record plus the URLs it serves on
#[derive(Debug, Clone, Serialize)]
pub struct CollectorInfo {
    #[serde(flatten)]
    pub record: CollectorRecord,
    pub metrics_url: String,
    pub health_url: String,
    pub dashboard_url: String,
    pub raw_url: String,
}

/// Consolidated view of the orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub deployment_type: DeploymentType,
    pub components_total: usize,
    pub components_running: usize,
    pub total_collectors: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub collectors: Vec<CollectorInfo>,
    pub issues: Vec<ValidationIssue>,
}

/// Problems found by [`Orchestrator::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    PortConflict { port: u16, components: Vec<String> },
    MissingNf { nf_type: NfType },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    nf_type: NfType,
    address: String,
}

/// Owner of the collector lifecycle table
pub struct Orchestrator {
    launcher: Arc<dyn CollectorLauncher>,
    classifier: Arc<dyn NfClassifier>,
    settings: OrchestratorSettings,
    collectors: RwLock<HashMap<String, RunningCollector>>,
    topology: RwLock<Arc<Topology>>,
    root: CancellationToken,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
    /// Set while the last scrape config write failed
    scrape_dirty: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        launcher: Arc<dyn CollectorLauncher>,
        classifier: Arc<dyn NfClassifier>,
        settings: OrchestratorSettings,
        root: CancellationToken,
        metrics: MonitorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            launcher,
            classifier,
            settings,
            collectors: RwLock::new(HashMap::new()),
            topology: RwLock::new(Arc::new(Topology::default())),
            root,
            metrics,
            logger,
            scrape_dirty: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Bring the collector set in line with `topology`
    ///
    /// The table lock is only held while entries are removed or inserted;
    /// launches and drains happen outside it.
    pub async fn reconcile(&self, topology: Arc<Topology>) -> ReconcileOutcome {
        self.metrics.inc_reconciliations();
        self.metrics.set_components_running(topology.running().count());
        *self.topology.write().await = topology.clone();

        let required = self.required(&topology);
        let mut outcome = ReconcileOutcome::default();

        let removed: Vec<RunningCollector> = {
            let mut table = self.collectors.write().await;
            let stale: Vec<String> = table
                .iter()
                .filter(|(name, running)| match required.get(*name) {
                    None => true,
                    Some(req) => {
                        req.nf_type != running.spec().nf_type
                            || req.address != running.spec().upstream_address
                    }
                })
                .map(|(name, _)| name.clone())
                .collect();
            stale.iter().filter_map(|name| table.remove(name)).collect()
        };

        let mut draining = Vec::with_capacity(removed.len());
        for running in removed {
            let spec = running.spec().clone();
            let reason = if required.contains_key(&spec.component_name) {
                "component changed"
            } else {
                "component no longer running"
            };
            self.logger
                .log_collector_stopped(&spec.component_name, spec.nf_type.as_str(), reason);
            self.metrics.inc_collector_stops();
            outcome.stopped.push(spec.component_name);
            draining.push(running.stop());
        }
        self.drain(draining).await;

        let (missing, mut used_ports) = {
            let table = self.collectors.read().await;
            let missing: Vec<(String, Requirement)> = required
                .iter()
                .filter(|(name, _)| !table.contains_key(*name))
                .map(|(name, req)| (name.clone(), req.clone()))
                .collect();
            let used: HashSet<u16> = table.values().map(|c| c.spec().port).collect();
            (missing, used)
        };

        for (name, req) in missing {
            let port = assign_port(req.nf_type, &used_ports);
            let spec = CollectorSpec {
                component_name: name.clone(),
                nf_type: req.nf_type,
                port,
                upstream_address: req.address.clone(),
                upstream_port: self.settings.upstream_metrics_port,
            };

            match self.launcher.launch(spec.clone(), self.root.child_token()).await {
                Ok(running) => {
                    used_ports.insert(port);
                    self.logger.log_collector_started(
                        &name,
                        req.nf_type.as_str(),
                        port,
                        &spec.upstream_url(),
                    );
                    self.metrics.inc_collector_starts();
                    self.collectors.write().await.insert(name.clone(), running);
                    outcome.started.push(name);
                }
                Err(e) => {
                    self.logger
                        .log_collector_failed(&name, req.nf_type.as_str(), &e.to_string());
                    self.metrics.inc_collector_start_failures();
                    outcome.failed.push(name);
                }
            }
        }

        let active = self.collectors.read().await.len();
        self.metrics.set_collectors_active(active);

        if outcome.changed() {
            self.logger
                .log_topology_change(outcome.started.len(), outcome.stopped.len(), active);
            self.write_scrape_config().await;
        } else if self.scrape_dirty.load(Ordering::SeqCst) {
            self.write_scrape_config().await;
        } else {
            debug!(active = active, "Reconcile pass made no changes");
        }

        outcome
    }

    /// Running components that map to a network function, by name
    fn required(&self, topology: &Topology) -> BTreeMap<String, Requirement> {
        topology
            .running()
            .filter_map(|component| {
                self.classifier.classify(component).map(|nf_type| {
                    (
                        component.name.clone(),
                        Requirement {
                            nf_type,
                            address: component.address.clone(),
                        },
                    )
                })
            })
            .collect()
    }

    async fn drain(&self, tasks: Vec<tokio::task::JoinHandle<()>>) {
        if tasks.is_empty() {
            return;
        }

        let count = tasks.len();
        let all = futures::future::join_all(tasks);
        if tokio::time::timeout(self.settings.stop_grace, all)
            .await
            .is_err()
        {
            warn!(
                collectors = count,
                grace_secs = self.settings.stop_grace.as_secs_f64(),
                "Stopped collectors did not drain within grace period"
            );
        }
    }

    pub async fn collector_count(&self) -> usize {
        self.collectors.read().await.len()
    }

    /// Records of every live collector, ordered by component name
    pub async fn records(&self) -> Vec<CollectorRecord> {
        let shared: Vec<_> = {
            let table = self.collectors.read().await;
            table.values().map(|c| c.shared().clone()).collect()
        };

        let mut records = Vec::with_capacity(shared.len());
        for collector in shared {
            records.push(collector.record().await);
        }
        records.sort_by(|a, b| a.component_name.cmp(&b.component_name));
        records
    }

    /// Per-collector URLs and status
    pub async fn collector_info(&self) -> Vec<CollectorInfo> {
        let host = &self.settings.scrape.advertise_host;

        self.records()
            .await
            .into_iter()
            .map(|record| {
                let base = format!("http://{}:{}", host, record.assigned_port);
                CollectorInfo {
                    metrics_url: format!("{}/metrics", base),
                    health_url: format!("{}/health", base),
                    dashboard_url: format!("{}/dashboard", base),
                    raw_url: format!("{}/debug/raw", base),
                    record,
                }
            })
            .collect()
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let topology = self.topology.read().await.clone();
        let collectors = self.collector_info().await;

        let count = |status: ComponentStatus| {
            collectors
                .iter()
                .filter(|c| c.record.health == status)
                .count()
        };

        OrchestratorStatus {
            deployment_type: topology.deployment_type,
            components_total: topology.len(),
            components_running: topology.running().count(),
            total_collectors: collectors.len(),
            healthy: count(ComponentStatus::Healthy),
            degraded: count(ComponentStatus::Degraded),
            unhealthy: count(ComponentStatus::Unhealthy),
            issues: self.validate().await,
            collectors,
        }
    }

    /// Scrape jobs for every live collector plus the sampler and prober
    pub async fn scrape_targets(&self) -> Vec<ScrapeTarget> {
        let topology = self.topology.read().await.clone();
        let mut specs: Vec<CollectorSpec> = {
            let table = self.collectors.read().await;
            table.values().map(|c| c.spec().clone()).collect()
        };
        specs.sort_by(|a, b| a.component_name.cmp(&b.component_name));

        let deployment = Some(topology.deployment_type);
        let scrape = &self.settings.scrape;
        let mut targets: Vec<ScrapeTarget> = specs
            .iter()
            .map(|spec| {
                scrape.collector_target(spec, topology.get(&spec.component_name), deployment)
            })
            .collect();
        targets.extend(scrape.infrastructure_targets(deployment));
        targets
    }

    /// Check for port conflicts and missing core network functions
    pub async fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let mut by_port: BTreeMap<u16, Vec<String>> = BTreeMap::new();
        let mut present: HashSet<NfType> = HashSet::new();
        {
            let table = self.collectors.read().await;
            for running in table.values() {
                let spec = running.spec();
                by_port
                    .entry(spec.port)
                    .or_default()
                    .push(spec.component_name.clone());
                present.insert(spec.nf_type);
            }
        }

        for (port, mut names) in by_port {
            if names.len() > 1 {
                names.sort();
                issues.push(ValidationIssue::PortConflict {
                    port,
                    components: names,
                });
            }
        }

        let topology = self.topology.read().await.clone();
        if !topology.is_empty() && topology.deployment_type != DeploymentType::FourG {
            for nf_type in EXPECTED_NFS {
                if !present.contains(&nf_type) {
                    issues.push(ValidationIssue::MissingNf { nf_type });
                }
            }
        }

        issues
    }

    /// Cancel every collector and wait for them to drain
    pub async fn shutdown(&self) {
        let removed: Vec<RunningCollector> = {
            let mut table = self.collectors.write().await;
            table.drain().map(|(_, running)| running).collect()
        };

        info!(collectors = removed.len(), "Stopping all collectors");
        let tasks: Vec<_> = removed
            .into_iter()
            .map(|running| {
                self.metrics.inc_collector_stops();
                running.stop()
            })
            .collect();
        self.drain(tasks).await;
        self.metrics.set_collectors_active(0);
    }

    /// Discovery loop: snapshot the topology every `interval`, publish it, reconcile
    ///
    /// The startup pass is expected to have run already, so the first
    /// snapshot is taken one interval after the loop starts.
    pub async fn run(
        self: Arc<Self>,
        source: Arc<dyn TopologySource>,
        interval: Duration,
        publisher: watch::Sender<Arc<Topology>>,
        health: HealthRegistry,
        token: CancellationToken,
    ) {
        info!(
            interval_secs = interval.as_secs_f64(),
            "Starting discovery loop"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = tokio::select! {
                _ = token.cancelled() => break,
                snapshot = source.snapshot() => snapshot,
            };

            match snapshot {
                Ok(topology) => {
                    let topology = Arc::new(topology);
                    publisher.send_replace(topology.clone());
                    health.set_healthy(components::TOPOLOGY).await;

                    let outcome = self.reconcile(topology).await;
                    if outcome.failed.is_empty() {
                        health.set_healthy(components::ORCHESTRATOR).await;
                    } else {
                        health
                            .set_degraded(
                                components::ORCHESTRATOR,
                                format!("failed to start collectors: {}", outcome.failed.join(", ")),
                            )
                            .await;
                    }
                }
                Err(e) => {
                    self.metrics.inc_topology_errors();
                    warn!(error = %e, "Failed to read topology, keeping current collectors");
                    health
                        .set_degraded(components::TOPOLOGY, format!("{:#}", e))
                        .await;
                }
            }
        }

        info!("Discovery loop stopped");
    }

    async fn write_scrape_config(&self) {
        let Some(path) = self.settings.scrape.path.clone() else {
            return;
        };

        let targets = self.scrape_targets().await;
        let deployment = self.topology.read().await.deployment_type;
        let shown = path.display().to_string();

        let result = match render(&targets, Some(deployment), &self.settings.scrape.monitor_label) {
            Ok(yaml) => write_atomically(&path, &yaml).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                self.scrape_dirty.store(false, Ordering::SeqCst);
                self.logger.log_scrape_config(&shown, targets.len(), true);
            }
            Err(e) => {
                self.scrape_dirty.store(true, Ordering::SeqCst);
                warn!(
                    path = %shown,
                    error = %format!("{:#}", e),
                    "Scrape config not written, retrying next pass"
                );
                self.logger.log_scrape_config(&shown, targets.len(), false);
            }
        }
    }
}

/// First port at or above the type's base port that no live collector holds
fn assign_port(nf_type: NfType, used: &HashSet<u16>) -> u16 {
    let mut port = nf_type.base_port();
    while used.contains(&port) && port < u16::MAX {
        port += 1;
    }
    port
}
