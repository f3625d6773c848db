//! NF monitor - observability sidecar for a containerized mobile core
//!
//! Discovers the core's components, runs one fetch-and-reexpose collector per
//! network function, samples container resources and probes component health.

use anyhow::{Context, Result};
use nfmon_core::{
    collector::HttpCollectorLauncher,
    health::{components, HealthRegistry},
    observability::{MonitorMetrics, StructuredLogger},
    orchestrator::{NameClassifier, Orchestrator},
    prober::HealthProber,
    runtime::{ContainerRuntime, DockerRuntime},
    sampler::ResourceSampler,
    topology::{FileTopologySource, RuntimeTopologySource, TopologySource},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting nfmon");

    let config = config::AgentConfig::load()?;
    info!(
        instance = %config.instance,
        api_port = config.api_port,
        topology_file = ?config.topology_file,
        "Monitor configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ORCHESTRATOR).await;
    health_registry.register(components::TOPOLOGY).await;
    health_registry.register(components::RESOURCE_SAMPLER).await;
    health_registry.register(components::HEALTH_PROBER).await;

    let metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(&config.instance);
    let root = CancellationToken::new();

    // A static topology file makes the container runtime optional
    let runtime: Option<Arc<dyn ContainerRuntime>> = match DockerRuntime::connect().await {
        Ok(runtime) => Some(Arc::new(runtime)),
        Err(e) if config.topology_file.is_some() => {
            warn!(error = %e, "Container runtime unavailable, resource sampling disabled");
            None
        }
        Err(e) => return Err(e).context("Failed to connect to the container runtime"),
    };

    let source: Arc<dyn TopologySource> = match (&config.topology_file, &runtime) {
        (Some(path), _) => Arc::new(FileTopologySource::new(path)),
        (None, Some(runtime)) => Arc::new(
            RuntimeTopologySource::new(runtime.clone()).with_image_filter(config.image_markers()),
        ),
        (None, None) => anyhow::bail!("No topology source available"),
    };

    let initial = Arc::new(
        source
            .snapshot()
            .await
            .context("Failed to read the initial topology")?,
    );
    info!(
        components = initial.len(),
        deployment_type = %initial.deployment_type,
        "Initial topology loaded"
    );
    let (topology_tx, topology_rx) = watch::channel(initial.clone());

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(HttpCollectorLauncher::new(
            config.collector_settings(),
            metrics.clone(),
        )),
        Arc::new(NameClassifier),
        config.orchestrator_settings(),
        root.clone(),
        metrics.clone(),
        logger.clone(),
    ));

    let outcome = orchestrator.reconcile(initial.clone()).await;
    if !outcome.failed.is_empty() {
        health_registry
            .set_degraded(
                components::ORCHESTRATOR,
                format!("failed to start collectors: {}", outcome.failed.join(", ")),
            )
            .await;
    }

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(orchestrator.clone().run(
        source,
        config.discovery_interval(),
        topology_tx,
        health_registry.clone(),
        root.child_token(),
    )));

    match &runtime {
        Some(runtime) => {
            let sampler = ResourceSampler::new(
                runtime.clone(),
                topology_rx.clone(),
                config.sampler_settings(),
                metrics.clone(),
            );
            tasks.push(
                sampler
                    .spawn(root.child_token(), health_registry.clone())
                    .await
                    .context("Failed to start resource sampler")?,
            );
        }
        None => {
            health_registry
                .set_degraded(components::RESOURCE_SAMPLER, "container runtime unavailable")
                .await;
        }
    }

    let prober = HealthProber::new(topology_rx, config.prober_settings(), metrics.clone())
        .context("Failed to create health prober")?;
    tasks.push(
        prober
            .spawn(root.child_token(), health_registry.clone())
            .await
            .context("Failed to start health prober")?,
    );

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        orchestrator.clone(),
    ));
    let api_token = root.child_token();
    let grace = config.shutdown_grace();
    let api_port = config.api_port;
    tasks.push(tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state, api_token, grace).await {
            warn!(error = %e, "API server exited with error");
        }
    }));

    health_registry.set_ready(true).await;
    logger.log_startup(MONITOR_VERSION, initial.len());

    let reason = shutdown_signal().await?;
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;

    root.cancel();
    orchestrator.shutdown().await;

    let drain = futures::future::join_all(tasks);
    if tokio::time::timeout(grace + Duration::from_secs(1), drain)
        .await
        .is_err()
    {
        warn!("Background tasks did not stop within grace period");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or, on unix, SIGTERM
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for SIGINT")?;
                Ok("SIGINT received")
            }
            _ = terminate.recv() => Ok("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
        Ok("SIGINT received")
    }
}
