//! Topology sources
//!
//! A topology source produces a fresh [`Topology`] snapshot on every
//! discovery tick. The default source reads the container runtime; a JSON
//! file source covers deployments whose components are not containers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::models::{Component, Topology};
use crate::runtime::{ContainerRuntime, RuntimeContainer};

#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn snapshot(&self) -> Result<Topology>;
}

/// Role tags by name marker, checked in order
const TYPE_TAGS: &[(&str, &str)] = &[
    ("sgwc", "4G-Control-Plane"),
    ("sgwu", "4G-User-Plane"),
    ("pcrf", "4G-Policy"),
    ("mme", "4G-Control-Plane"),
    ("hss", "4G-Database"),
    ("amf", "5G-Control-Plane"),
    ("smf", "5G-Control-Plane"),
    ("upf", "5G-User-Plane"),
    ("nrf", "5G-Service-Discovery"),
    ("udm", "5G-User-Management"),
    ("udr", "5G-Database"),
    ("ausf", "5G-Authentication"),
    ("pcf", "5G-Policy"),
    ("nssf", "5G-Slicing"),
    ("bsf", "5G-Binding-Support"),
    ("scp", "5G-Service-Communication-Proxy"),
    ("webui", "Web-Interface"),
    ("mongo", "Database"),
    ("grafana", "Monitoring"),
    ("srsenb", "4G-Radio-Access-Network"),
    ("srsgnb", "5G-Radio-Access-Network"),
    ("srsue", "User-Equipment"),
];

/// Role tag for a component name, "Unknown" when no marker matches
pub fn component_type_for(name: &str) -> &'static str {
    let name = name.to_ascii_lowercase();
    TYPE_TAGS
        .iter()
        .find(|(marker, _)| name.contains(marker))
        .map(|(_, tag)| *tag)
        .unwrap_or("Unknown")
}

/// Builds the topology from the containers the runtime reports
pub struct RuntimeTopologySource {
    runtime: Arc<dyn ContainerRuntime>,
    image_markers: Vec<String>,
}

impl RuntimeTopologySource {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            image_markers: Vec::new(),
        }
    }

    /// Only keep containers whose image contains one of `markers`
    pub fn with_image_filter(mut self, markers: Vec<String>) -> Self {
        self.image_markers = markers;
        self
    }

    fn is_relevant(&self, container: &RuntimeContainer) -> bool {
        self.image_markers.is_empty()
            || self
                .image_markers
                .iter()
                .any(|marker| container.image.contains(marker.as_str()))
    }
}

#[async_trait]
impl TopologySource for RuntimeTopologySource {
    async fn snapshot(&self) -> Result<Topology> {
        let containers = self
            .runtime
            .list_containers()
            .await
            .context("Failed to list containers")?;

        let components = containers
            .into_iter()
            .filter(|c| !c.name.is_empty() && self.is_relevant(c))
            .map(|c| Component {
                component_type: component_type_for(&c.name).to_string(),
                address: c.address.clone().unwrap_or_else(|| c.name.clone()),
                running: c.is_running(),
                ports: c.ports.clone(),
                name: c.name,
            });

        Ok(Topology::from_components(components))
    }
}

#[derive(Debug, Deserialize)]
struct TopologyFile {
    components: Vec<Component>,
}

/// Reads the topology from a JSON file on every snapshot
///
/// The file holds `{"components": [{"name", "type", "address", "running", "ports"}]}`.
pub struct FileTopologySource {
    path: PathBuf,
}

impl FileTopologySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TopologySource for FileTopologySource {
    async fn snapshot(&self) -> Result<Topology> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read topology file {}", self.path.display()))?;
        let file: TopologyFile = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid topology file {}", self.path.display()))?;

        Ok(Topology::from_components(file.components))
    }
}

/// In-memory topology that can be replaced at any time
#[derive(Debug, Default)]
pub struct StaticTopologySource {
    topology: RwLock<Topology>,
}

impl StaticTopologySource {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology: RwLock::new(topology),
        }
    }

    pub fn set(&self, topology: Topology) {
        match self.topology.write() {
            Ok(mut guard) => *guard = topology,
            Err(poisoned) => *poisoned.into_inner() = topology,
        }
    }
}

#[async_trait]
impl TopologySource for StaticTopologySource {
    async fn snapshot(&self) -> Result<Topology> {
        let topology = match self.topology.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Ok(topology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeploymentType;
    use crate::runtime::RuntimeError;
    use tempfile::TempDir;

    struct FixedRuntime {
        containers: Vec<RuntimeContainer>,
    }

    #[async_trait]
    impl ContainerRuntime for FixedRuntime {
        async fn list_containers(&self) -> Result<Vec<RuntimeContainer>, RuntimeError> {
            Ok(self.containers.clone())
        }

        async fn stats_snapshot(
            &self,
            container_id: &str,
        ) -> Result<serde_json::Value, RuntimeError> {
            Err(RuntimeError::EmptyStats(container_id.to_string()))
        }
    }

    fn container(name: &str, state: &str, image: &str, address: Option<&str>) -> RuntimeContainer {
        RuntimeContainer {
            id: format!("{}-id", name),
            name: name.to_string(),
            state: state.to_string(),
            image: image.to_string(),
            address: address.map(str::to_string),
            ports: vec![7777],
            ..Default::default()
        }
    }

    #[test]
    fn test_component_type_markers() {
        assert_eq!(component_type_for("open5gs-amf"), "5G-Control-Plane");
        assert_eq!(component_type_for("sgwu"), "4G-User-Plane");
        assert_eq!(component_type_for("pcrf"), "4G-Policy");
        assert_eq!(component_type_for("pcf"), "5G-Policy");
        assert_eq!(component_type_for("redis"), "Unknown");
    }

    #[tokio::test]
    async fn test_runtime_source_maps_containers() {
        let runtime = Arc::new(FixedRuntime {
            containers: vec![
                container("amf", "running", "docker_open5gs", Some("172.22.0.10")),
                container("smf", "exited", "docker_open5gs", Some("172.22.0.7")),
                container("upf", "running", "docker_open5gs", None),
                container("postgres", "running", "postgres:16", Some("172.22.0.30")),
            ],
        });
        let source = RuntimeTopologySource::new(runtime)
            .with_image_filter(vec!["docker_open5gs".to_string()]);

        let topology = source.snapshot().await.unwrap();

        assert_eq!(topology.len(), 3);
        assert!(topology.get("postgres").is_none());
        assert_eq!(topology.deployment_type, DeploymentType::FiveG);

        let amf = topology.get("amf").unwrap();
        assert!(amf.running);
        assert_eq!(amf.address, "172.22.0.10");
        assert_eq!(amf.component_type, "5G-Control-Plane");
        assert_eq!(amf.ports, vec![7777]);

        assert!(!topology.is_running("smf"));
        assert_eq!(topology.get("upf").unwrap().address, "upf");
    }

    #[tokio::test]
    async fn test_file_source_reads_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("topology.json");
        tokio::fs::write(
            &path,
            r#"{"components": [
                {"name": "mme", "type": "4G-Control-Plane", "address": "10.0.0.2", "running": true, "ports": [9090]},
                {"name": "hss", "address": "10.0.0.3", "running": false}
            ]}"#,
        )
        .await
        .unwrap();

        let topology = FileTopologySource::new(&path).snapshot().await.unwrap();

        assert_eq!(topology.len(), 2);
        assert_eq!(topology.deployment_type, DeploymentType::FourG);
        assert_eq!(topology.get("mme").unwrap().ports, vec![9090]);
        assert!(!topology.is_running("hss"));
    }

    #[tokio::test]
    async fn test_file_source_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let source = FileTopologySource::new(dir.path().join("absent.json"));

        let err = source.snapshot().await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read topology file"));
    }

    #[tokio::test]
    async fn test_static_source_replacement() {
        let source = StaticTopologySource::default();
        assert!(source.snapshot().await.unwrap().is_empty());

        source.set(Topology::from_components([Component::new(
            "amf", "", "10.0.0.1", true,
        )]));
        assert_eq!(source.snapshot().await.unwrap().len(), 1);
    }
}
