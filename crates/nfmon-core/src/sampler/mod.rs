//! Container resource sampler
//!
//! Periodically takes one stats snapshot per running component's container
//! and keeps the latest sample per component for the `/container/metrics`
//! endpoint.

pub mod extract;
mod server;

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::health::{components, HealthRegistry};
use crate::models::{ContainerStats, Topology};
use crate::observability::MonitorMetrics;
use crate::runtime::{ContainerRuntime, RuntimeError};
use extract::CpuSample;

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    /// Time between sweeps (default: 10 seconds)
    pub interval: Duration,
    pub port: u16,
    pub bind_host: IpAddr,
    pub shutdown_grace: Duration,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            port: 8080,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("sweep cancelled")]
    Cancelled,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("failed to bind sampler port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Latest sample per component name
pub type SampleCache = Arc<DashMap<String, ContainerStats>>;

pub struct ResourceSampler {
    runtime: Arc<dyn ContainerRuntime>,
    topology: watch::Receiver<Arc<Topology>>,
    settings: SamplerSettings,
    previous_cpu: HashMap<String, CpuSample>,
    cache: SampleCache,
    metrics: MonitorMetrics,
}

impl ResourceSampler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        topology: watch::Receiver<Arc<Topology>>,
        settings: SamplerSettings,
        metrics: MonitorMetrics,
    ) -> Self {
        Self {
            runtime,
            topology,
            settings,
            previous_cpu: HashMap::new(),
            cache: Arc::new(DashMap::new()),
            metrics,
        }
    }

    pub fn cache(&self) -> SampleCache {
        self.cache.clone()
    }

    /// Sample every running component once; returns the number of samples taken
    pub async fn sweep(&mut self, token: &CancellationToken) -> Result<usize, SamplerError> {
        let started = Instant::now();
        let topology = self.topology.borrow().clone();

        let running: HashSet<&str> = topology.running().map(|c| c.name.as_str()).collect();
        self.cache.retain(|name, _| running.contains(name.as_str()));
        self.previous_cpu
            .retain(|name, _| running.contains(name.as_str()));

        if running.is_empty() {
            self.metrics
                .observe_sampler_sweep(started.elapsed().as_secs_f64(), 0);
            return Ok(0);
        }

        let containers = cancellable(token, self.runtime.list_containers()).await?;
        let ids: HashMap<&str, &str> = containers
            .iter()
            .map(|c| (c.name.as_str(), c.id.as_str()))
            .collect();

        let mut sampled = 0;
        let mut names: Vec<&str> = running.iter().copied().collect();
        names.sort_unstable();

        for name in names {
            let Some(id) = ids.get(name) else {
                debug!(component = %name, "No container for component");
                continue;
            };

            let raw = match cancellable(token, self.runtime.stats_snapshot(id)).await {
                Ok(raw) => raw,
                Err(SamplerError::Cancelled) => return Err(SamplerError::Cancelled),
                Err(e) => {
                    warn!(component = %name, error = %e, "Failed to read container stats");
                    continue;
                }
            };

            let mut previous = self.previous_cpu.get(name).copied();
            let stats = extract::sample(
                &raw,
                id,
                name,
                &mut previous,
                chrono::Utc::now().timestamp(),
            );
            if let Some(current) = previous {
                self.previous_cpu.insert(name.to_string(), current);
            }
            for warning in &stats.warnings {
                warn!(component = %name, warning = %warning, "Incomplete container stats");
            }

            self.cache.insert(name.to_string(), stats);
            sampled += 1;
        }

        self.metrics
            .observe_sampler_sweep(started.elapsed().as_secs_f64(), sampled);
        Ok(sampled)
    }

    /// Sweep once immediately, then every interval, until cancelled
    pub async fn run(mut self, token: CancellationToken, health: HealthRegistry) {
        info!(
            interval_secs = self.settings.interval.as_secs_f64(),
            "Starting resource sampler"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.sweep(&token).await {
                Ok(count) => {
                    debug!(containers = count, "Sampler sweep complete");
                    health.set_healthy(components::RESOURCE_SAMPLER).await;
                }
                Err(SamplerError::Cancelled) => break,
                Err(e) => {
                    warn!(error = %e, "Sampler sweep failed");
                    health
                        .set_degraded(components::RESOURCE_SAMPLER, e.to_string())
                        .await;
                }
            }
        }

        info!("Resource sampler stopped");
    }

    /// Bind the HTTP port, then run the sweep loop and the server until cancelled
    pub async fn spawn(
        self,
        token: CancellationToken,
        health: HealthRegistry,
    ) -> Result<JoinHandle<()>, SamplerError> {
        let port = self.settings.port;
        let listener = crate::server::bind(self.settings.bind_host, port)
            .await
            .map_err(|source| SamplerError::Bind { port, source })?;

        let grace = self.settings.shutdown_grace;
        let router = server::router(server::SamplerState {
            cache: self.cache.clone(),
            topology: self.topology.clone(),
        });

        Ok(tokio::spawn(async move {
            let (_, served) = tokio::join!(
                self.run(token.clone(), health),
                crate::server::serve_until_cancelled(listener, router, token, grace, "sampler"),
            );
            if let Err(e) = served {
                warn!(error = %e, "Sampler server exited with error");
            }
        }))
    }
}

/// Run a runtime call unless `token` is cancelled first
async fn cancellable<T>(
    token: &CancellationToken,
    call: impl Future<Output = Result<T, RuntimeError>>,
) -> Result<T, SamplerError> {
    if token.is_cancelled() {
        return Err(SamplerError::Cancelled);
    }

    tokio::select! {
        _ = token.cancelled() => Err(SamplerError::Cancelled),
        result = call => result.map_err(SamplerError::from),
    }
}
