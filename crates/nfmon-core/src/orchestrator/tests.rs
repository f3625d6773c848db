//! Orchestrator tests with an in-process launcher
//!
//! The mock launcher never binds a socket; each "collector" is a task that
//! waits on its token and counts the cancellation.

use super::*;
use crate::collector::{CollectorError, CollectorSettings, CollectorShared};
use crate::models::Component;
use crate::topology::StaticTopologySource;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

#[derive(Default)]
struct MockLauncher {
    starts: AtomicUsize,
    cancels: Arc<AtomicUsize>,
    fail_ports: Mutex<HashSet<u16>>,
    launched: Mutex<Vec<CollectorSpec>>,
}

impl MockLauncher {
    fn fail_on(&self, port: u16) {
        self.fail_ports.lock().unwrap().insert(port);
    }

    fn clear_failures(&self) {
        self.fail_ports.lock().unwrap().clear();
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    fn launched(&self) -> Vec<CollectorSpec> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl CollectorLauncher for MockLauncher {
    async fn launch(
        &self,
        spec: CollectorSpec,
        token: CancellationToken,
    ) -> Result<RunningCollector, CollectorError> {
        if self.fail_ports.lock().unwrap().contains(&spec.port) {
            return Err(CollectorError::Bind {
                port: spec.port,
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "port in use"),
            });
        }

        self.starts.fetch_add(1, Ordering::SeqCst);
        self.launched.lock().unwrap().push(spec.clone());

        let cancels = self.cancels.clone();
        let wait = token.clone();
        let task = tokio::spawn(async move {
            wait.cancelled().await;
            cancels.fetch_add(1, Ordering::SeqCst);
        });

        let shared = Arc::new(CollectorShared::new(spec.clone(), CollectorSettings::default()));
        let addr: SocketAddr = ([127, 0, 0, 1], spec.port).into();
        Ok(RunningCollector::new(shared, addr, token, task))
    }
}

fn orchestrator_with(
    launcher: Arc<MockLauncher>,
    settings: OrchestratorSettings,
) -> (Arc<Orchestrator>, CancellationToken) {
    let root = CancellationToken::new();
    let orchestrator = Orchestrator::new(
        launcher,
        Arc::new(NameClassifier),
        settings,
        root.clone(),
        MonitorMetrics::new(),
        StructuredLogger::new("test"),
    );
    (Arc::new(orchestrator), root)
}

fn orchestrator(launcher: Arc<MockLauncher>) -> Arc<Orchestrator> {
    orchestrator_with(launcher, OrchestratorSettings::default()).0
}

fn topology(components: &[(&str, &str, bool)]) -> Arc<Topology> {
    Arc::new(Topology::from_components(components.iter().map(
        |(name, address, running)| Component::new(*name, "", *address, *running),
    )))
}

fn port_of(records: &[CollectorRecord], name: &str) -> u16 {
    records
        .iter()
        .find(|r| r.component_name == name)
        .map(|r| r.assigned_port)
        .unwrap()
}

#[tokio::test]
async fn test_reconcile_starts_one_collector_per_nf() {
    let launcher = Arc::new(MockLauncher::default());
    let orch = orchestrator(launcher.clone());

    let outcome = orch
        .reconcile(topology(&[
            ("amf", "10.0.0.1", true),
            ("smf", "10.0.0.2", true),
            ("nrf", "10.0.0.3", true),
            ("mongo", "10.0.0.4", true),
        ]))
        .await;

    assert_eq!(outcome.started, vec!["amf".to_string(), "smf".to_string()]);
    assert!(outcome.stopped.is_empty());
    assert_eq!(orch.collector_count().await, 2);

    let records = orch.records().await;
    assert_eq!(port_of(&records, "amf"), 9091);
    assert_eq!(port_of(&records, "smf"), 9092);
    assert_eq!(records[0].upstream_url, "http://10.0.0.1:9090/metrics");
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let launcher = Arc::new(MockLauncher::default());
    let orch = orchestrator(launcher.clone());
    let topo = topology(&[("amf", "10.0.0.1", true), ("upf", "10.0.0.9", true)]);

    orch.reconcile(topo.clone()).await;
    let second = orch.reconcile(topo).await;

    assert!(!second.changed());
    assert_eq!(launcher.starts(), 2);
    assert_eq!(launcher.cancels(), 0);
    assert_eq!(orch.collector_count().await, 2);
}

#[tokio::test]
async fn test_stopped_component_cancels_exactly_once() {
    let launcher = Arc::new(MockLauncher::default());
    let orch = orchestrator(launcher.clone());

    orch.reconcile(topology(&[("amf", "10.0.0.1", true), ("smf", "10.0.0.2", true)]))
        .await;

    let outcome = orch
        .reconcile(topology(&[("amf", "10.0.0.1", true), ("smf", "10.0.0.2", false)]))
        .await;
    assert_eq!(outcome.stopped, vec!["smf".to_string()]);
    assert_eq!(launcher.cancels(), 1);

    // gone entirely: nothing left to cancel
    orch.reconcile(topology(&[("amf", "10.0.0.1", true)])).await;
    assert_eq!(launcher.cancels(), 1);

    let outcome = orch
        .reconcile(topology(&[("amf", "10.0.0.1", true), ("smf", "10.0.0.2", true)]))
        .await;
    assert_eq!(outcome.started, vec!["smf".to_string()]);
    assert_eq!(launcher.starts(), 3);
    assert_eq!(orch.collector_count().await, 2);
}

#[tokio::test]
async fn test_amf_smf_flip() {
    let launcher = Arc::new(MockLauncher::default());
    let orch = orchestrator(launcher.clone());

    let first = orch
        .reconcile(topology(&[("amf", "10.0.0.1", true), ("smf", "10.0.0.2", false)]))
        .await;
    assert_eq!(first.started, vec!["amf".to_string()]);
    assert!(first.stopped.is_empty());
    assert_eq!(orch.collector_count().await, 1);
    assert_eq!(port_of(&orch.records().await, "amf"), 9091);

    let flipped = orch
        .reconcile(topology(&[("amf", "10.0.0.1", false), ("smf", "10.0.0.2", true)]))
        .await;
    assert_eq!(flipped.stopped, vec!["amf".to_string()]);
    assert_eq!(flipped.started, vec!["smf".to_string()]);
    assert_eq!(launcher.cancels(), 1);
    assert_eq!(launcher.starts(), 2);

    let records = orch.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(port_of(&records, "smf"), 9092);
}

#[tokio::test]
async fn test_port_assignment_skips_held_ports() {
    let launcher = Arc::new(MockLauncher::default());
    let orch = orchestrator(launcher.clone());

    orch.reconcile(topology(&[("amf-1", "10.0.0.1", true), ("amf-2", "10.0.0.2", true)]))
        .await;
    let records = orch.records().await;
    assert_eq!(port_of(&records, "amf-1"), 9091);
    assert_eq!(port_of(&records, "amf-2"), 9092);

    // smf's base port is held by amf-2
    orch.reconcile(topology(&[
        ("amf-1", "10.0.0.1", true),
        ("amf-2", "10.0.0.2", true),
        ("smf", "10.0.0.3", true),
    ]))
    .await;
    assert_eq!(port_of(&orch.records().await, "smf"), 9093);
    assert!(orch.validate().await.iter().all(|issue| !matches!(
        issue,
        ValidationIssue::PortConflict { .. }
    )));
}

#[tokio::test]
async fn test_freed_port_is_reused() {
    let launcher = Arc::new(MockLauncher::default());
    let orch = orchestrator(launcher.clone());

    orch.reconcile(topology(&[("amf", "10.0.0.1", true)])).await;
    orch.reconcile(topology(&[])).await;
    orch.reconcile(topology(&[("amf-new", "10.0.0.7", true)])).await;

    assert_eq!(port_of(&orch.records().await, "amf-new"), 9091);
}

#[tokio::test]
async fn test_failed_start_is_retried() {
    let launcher = Arc::new(MockLauncher::default());
    launcher.fail_on(9093);
    let orch = orchestrator(launcher.clone());
    let topo = topology(&[("pcf", "10.0.0.4", true), ("amf", "10.0.0.1", true)]);

    let first = orch.reconcile(topo.clone()).await;
    assert_eq!(first.started, vec!["amf".to_string()]);
    assert_eq!(first.failed, vec!["pcf".to_string()]);
    assert_eq!(orch.collector_count().await, 1);

    launcher.clear_failures();
    let second = orch.reconcile(topo).await;
    assert_eq!(second.started, vec!["pcf".to_string()]);
    assert!(second.failed.is_empty());
    assert_eq!(orch.collector_count().await, 2);
}

#[tokio::test]
async fn test_address_change_restarts_collector() {
    let launcher = Arc::new(MockLauncher::default());
    let orch = orchestrator(launcher.clone());

    orch.reconcile(topology(&[("upf", "10.0.0.9", true)])).await;
    let outcome = orch.reconcile(topology(&[("upf", "10.0.0.10", true)])).await;

    assert_eq!(outcome.stopped, vec!["upf".to_string()]);
    assert_eq!(outcome.started, vec!["upf".to_string()]);
    assert_eq!(launcher.cancels(), 1);

    let launched = launcher.launched();
    assert_eq!(launched.len(), 2);
    assert_eq!(launched[1].upstream_address, "10.0.0.10");
    assert_eq!(launched[1].port, 9094);
}

#[tokio::test]
async fn test_scrape_config_written_on_change() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("targets.yml");
    let settings = OrchestratorSettings {
        scrape: ScrapeSettings {
            path: Some(path.clone()),
            ..Default::default()
        },
        ..Default::default()
    };
    let launcher = Arc::new(MockLauncher::default());
    let (orch, _root) = orchestrator_with(launcher, settings);

    orch.reconcile(topology(&[("amf", "10.0.0.1", true), ("smf", "10.0.0.2", true)]))
        .await;

    let yaml = tokio::fs::read_to_string(&path).await.unwrap();
    let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
    let jobs: Vec<&str> = doc["scrape_configs"]
        .as_sequence()
        .unwrap()
        .iter()
        .map(|job| job["job_name"].as_str().unwrap())
        .collect();
    assert_eq!(
        jobs,
        vec!["amf-real", "smf-real", "container-metrics", "health-checks"]
    );
    assert_eq!(doc["global"]["external_labels"]["deployment_type"], "5G");

    orch.reconcile(topology(&[("amf", "10.0.0.1", true)])).await;
    let yaml = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(!yaml.contains("smf-real"));
}

#[tokio::test]
async fn test_failed_scrape_config_write_is_retried() {
    let dir = TempDir::new().unwrap();
    // a plain file where the config directory should be
    let blocker = dir.path().join("prometheus");
    std::fs::write(&blocker, "").unwrap();
    let path = blocker.join("targets.yml");
    let settings = OrchestratorSettings {
        scrape: ScrapeSettings {
            path: Some(path.clone()),
            ..Default::default()
        },
        ..Default::default()
    };
    let launcher = Arc::new(MockLauncher::default());
    let (orch, _root) = orchestrator_with(launcher, settings);
    let topo = topology(&[("amf", "10.0.0.1", true)]);

    orch.reconcile(topo.clone()).await;
    assert!(!path.exists());

    std::fs::remove_file(&blocker).unwrap();
    let outcome = orch.reconcile(topo.clone()).await;
    assert!(!outcome.changed());
    let yaml = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(yaml.contains("amf-real"));

    // written once more, then left alone
    std::fs::remove_file(&path).unwrap();
    orch.reconcile(topo).await;
    assert!(!path.exists());
}

#[tokio::test]
async fn test_validate_reports_missing_core_nfs() {
    let launcher = Arc::new(MockLauncher::default());
    let orch = orchestrator(launcher);

    assert!(orch.validate().await.is_empty());

    orch.reconcile(topology(&[("amf", "10.0.0.1", true), ("nrf", "10.0.0.3", true)]))
        .await;
    let issues = orch.validate().await;

    assert_eq!(
        issues,
        vec![
            ValidationIssue::MissingNf {
                nf_type: NfType::Smf
            },
            ValidationIssue::MissingNf {
                nf_type: NfType::Upf
            },
        ]
    );
}

#[tokio::test]
async fn test_validate_skips_missing_nfs_for_4g() {
    let launcher = Arc::new(MockLauncher::default());
    let orch = orchestrator(launcher);

    orch.reconcile(topology(&[("mme", "10.0.0.2", true), ("hss", "10.0.0.3", true)]))
        .await;

    assert!(orch.validate().await.is_empty());
    let status = orch.status().await;
    assert_eq!(status.deployment_type, DeploymentType::FourG);
    assert_eq!(status.total_collectors, 1);
    assert_eq!(status.components_total, 2);
}

#[tokio::test]
async fn test_status_lists_collector_urls() {
    let launcher = Arc::new(MockLauncher::default());
    let orch = orchestrator(launcher);

    orch.reconcile(topology(&[("amf", "10.0.0.1", true)])).await;
    let status = orch.status().await;

    assert_eq!(status.total_collectors, 1);
    // no fetch yet, so not healthy
    assert_eq!(status.degraded, 1);
    let info = &status.collectors[0];
    assert_eq!(info.metrics_url, "http://localhost:9091/metrics");
    assert_eq!(info.raw_url, "http://localhost:9091/debug/raw");

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["collectors"][0]["component_name"], "amf");
    assert_eq!(json["collectors"][0]["dashboard_url"], "http://localhost:9091/dashboard");
}

#[tokio::test]
async fn test_shutdown_cancels_everything() {
    let launcher = Arc::new(MockLauncher::default());
    let orch = orchestrator(launcher.clone());

    orch.reconcile(topology(&[
        ("amf", "10.0.0.1", true),
        ("smf", "10.0.0.2", true),
        ("upf", "10.0.0.3", true),
    ]))
    .await;
    orch.shutdown().await;

    assert_eq!(orch.collector_count().await, 0);
    assert_eq!(launcher.cancels(), 3);
}

#[tokio::test]
async fn test_root_cancel_reaches_collectors() {
    let launcher = Arc::new(MockLauncher::default());
    let (orch, root) = orchestrator_with(launcher.clone(), OrchestratorSettings::default());

    orch.reconcile(topology(&[("amf", "10.0.0.1", true)])).await;
    root.cancel();

    for _ in 0..50 {
        if launcher.cancels() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(launcher.cancels(), 1);
}

#[tokio::test]
async fn test_run_loop_publishes_and_reconciles() {
    let launcher = Arc::new(MockLauncher::default());
    let (orch, root) = orchestrator_with(launcher.clone(), OrchestratorSettings::default());
    let source = Arc::new(StaticTopologySource::new(Topology::from_components([
        Component::new("amf", "", "10.0.0.1", true),
    ])));
    let (tx, mut rx) = watch::channel(Arc::new(Topology::default()));
    let health = HealthRegistry::new();

    let task = tokio::spawn(orch.clone().run(
        source.clone(),
        Duration::from_millis(50),
        tx,
        health.clone(),
        root.child_token(),
    ));

    tokio::time::timeout(Duration::from_secs(2), rx.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(rx.borrow().is_running("amf"));

    source.set(Topology::from_components([
        Component::new("amf", "", "10.0.0.1", true),
        Component::new("smf", "", "10.0.0.2", true),
    ]));
    for _ in 0..100 {
        if orch.collector_count().await == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(orch.collector_count().await, 2);

    let report = health.health().await;
    assert_eq!(
        report.components[components::ORCHESTRATOR].status,
        ComponentStatus::Healthy
    );

    root.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
}

#[test]
fn test_assign_port_walks_upward() {
    let used: HashSet<u16> = [9093, 9094].into_iter().collect();
    assert_eq!(assign_port(NfType::Pcf, &used), 9095);
    assert_eq!(assign_port(NfType::Amf, &used), 9091);
}
