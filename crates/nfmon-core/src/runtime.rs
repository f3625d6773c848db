//! Container runtime access
//!
//! The sampler and the topology source only need two calls from the runtime:
//! list containers, and take a one-shot stats snapshot of a container. Both
//! sit behind [`ContainerRuntime`] so tests can substitute a fake.

use async_trait::async_trait;
use bollard::container::{ListContainersOptions, StatsOptions};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// A container as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeContainer {
    pub id: String,
    /// Primary name without the leading slash
    pub name: String,
    /// Runtime state, e.g. "running" or "exited"
    pub state: String,
    pub image: String,
    /// First non-empty network address
    pub address: Option<String>,
    /// Private (container-side) ports, deduplicated
    pub ports: Vec<u16>,
    pub labels: HashMap<String, String>,
}

impl RuntimeContainer {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container runtime error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("no stats returned for container {0}")]
    EmptyStats(String),

    #[error("failed to encode stats payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All containers, running or not
    async fn list_containers(&self) -> Result<Vec<RuntimeContainer>, RuntimeError>;

    /// One non-streaming stats snapshot, as the raw JSON document
    async fn stats_snapshot(&self, container_id: &str) -> Result<serde_json::Value, RuntimeError>;
}

/// Docker Engine API over the local socket
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect with the platform defaults (DOCKER_HOST or the local socket) and ping
    pub async fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        info!("Connected to container runtime");

        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<RuntimeContainer>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let summaries = self.docker.list_containers(Some(options)).await?;

        let containers: Vec<RuntimeContainer> = summaries
            .into_iter()
            .map(|summary| {
                let name = summary
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();

                let address = summary
                    .network_settings
                    .as_ref()
                    .and_then(|settings| settings.networks.as_ref())
                    .and_then(|networks| {
                        let mut names: Vec<&String> = networks.keys().collect();
                        names.sort();
                        names.into_iter().find_map(|net| {
                            networks[net]
                                .ip_address
                                .clone()
                                .filter(|ip| !ip.is_empty())
                        })
                    });

                let mut ports: Vec<u16> = summary
                    .ports
                    .unwrap_or_default()
                    .iter()
                    .map(|p| p.private_port)
                    .collect();
                ports.sort_unstable();
                ports.dedup();

                RuntimeContainer {
                    id: summary.id.unwrap_or_default(),
                    name,
                    state: summary.state.unwrap_or_default(),
                    image: summary.image.unwrap_or_default(),
                    address,
                    ports,
                    labels: summary.labels.unwrap_or_default(),
                }
            })
            .collect();

        debug!(count = containers.len(), "Listed containers");
        Ok(containers)
    }

    async fn stats_snapshot(&self, container_id: &str) -> Result<serde_json::Value, RuntimeError> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };
        let mut stream = self.docker.stats(container_id, Some(options));

        match stream.next().await {
            Some(Ok(stats)) => Ok(serde_json::to_value(&stats)?),
            Some(Err(e)) => Err(e.into()),
            None => Err(RuntimeError::EmptyStats(container_id.to_string())),
        }
    }
}
