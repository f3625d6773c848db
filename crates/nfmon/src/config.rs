//! Monitor configuration

use anyhow::{Context, Result};
use nfmon_core::collector::CollectorSettings;
use nfmon_core::orchestrator::{OrchestratorSettings, ScrapeSettings};
use nfmon_core::prober::{CheckPolicy, ProberSettings};
use nfmon_core::sampler::SamplerSettings;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "NFMON";
const CONFIG_FILE_VAR: &str = "NFMON_CONFIG_FILE";

/// Monitor configuration, read from `NFMON_*` environment variables and an
/// optional file named by `NFMON_CONFIG_FILE`
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Instance name attached to structured log events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Admin API port for health, readiness, metrics and status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Topology refresh interval in seconds
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,

    /// Upstream fetch interval per collector, in seconds
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Age of the last successful fetch after which a collector is unhealthy
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Port the network functions serve their own metrics on
    #[serde(default = "default_upstream_metrics_port")]
    pub upstream_metrics_port: u16,

    #[serde(default = "default_sampler_port")]
    pub sampler_port: u16,

    #[serde(default = "default_sampler_interval")]
    pub sampler_interval_secs: u64,

    #[serde(default = "default_prober_port")]
    pub prober_port: u16,

    #[serde(default = "default_prober_interval")]
    pub prober_interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Port serving `/health` on control-plane functions
    #[serde(default = "default_management_port")]
    pub management_port: u16,

    /// Where to write the generated scrape configuration; unset disables it
    #[serde(default)]
    pub scrape_config_path: Option<PathBuf>,

    /// Host name the downstream scraper uses to reach this process
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,

    /// Drain period for HTTP servers after cancellation, in seconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Static JSON topology used instead of the container runtime
    #[serde(default)]
    pub topology_file: Option<PathBuf>,

    /// Comma-separated image substrings; only matching containers are monitored
    #[serde(default)]
    pub image_filter: String,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "nfmon".to_string())
}

fn default_api_port() -> u16 {
    9000
}

fn default_discovery_interval() -> u64 {
    10
}

fn default_fetch_interval() -> u64 {
    5
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_stale_after() -> u64 {
    30
}

fn default_upstream_metrics_port() -> u16 {
    9090
}

fn default_sampler_port() -> u16 {
    8080
}

fn default_sampler_interval() -> u64 {
    10
}

fn default_prober_port() -> u16 {
    8081
}

fn default_prober_interval() -> u64 {
    15
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_management_port() -> u16 {
    8080
}

fn default_advertise_host() -> String {
    "localhost".to_string()
}

fn default_shutdown_grace() -> u64 {
    5
}

impl AgentConfig {
    /// Load configuration from the process environment and the optional file
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_VAR).ok().map(PathBuf::from);
        Self::from_sources(file, config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_sources(file: Option<PathBuf>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        let config = builder
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to read configuration sources")?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid monitor configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Intervals and timeouts drive tokio timers, which reject zero
    fn validate(&self) -> Result<()> {
        let durations = [
            ("discovery_interval_secs", self.discovery_interval_secs),
            ("fetch_interval_secs", self.fetch_interval_secs),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("stale_after_secs", self.stale_after_secs),
            ("sampler_interval_secs", self.sampler_interval_secs),
            ("prober_interval_secs", self.prober_interval_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
        ];

        for (name, value) in durations {
            if value == 0 {
                anyhow::bail!("Invalid monitor configuration: {} must be greater than zero", name);
            }
        }

        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn image_markers(&self) -> Vec<String> {
        self.image_filter
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            fetch_interval: Duration::from_secs(self.fetch_interval_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            stale_after: Duration::from_secs(self.stale_after_secs),
            shutdown_grace: self.shutdown_grace(),
            ..Default::default()
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            upstream_metrics_port: self.upstream_metrics_port,
            // collectors get their own grace plus a margin before being abandoned
            stop_grace: self.shutdown_grace() + Duration::from_secs(1),
            scrape: ScrapeSettings {
                path: self.scrape_config_path.clone(),
                advertise_host: self.advertise_host.clone(),
                collector_interval: Duration::from_secs(self.fetch_interval_secs),
                sampler_port: self.sampler_port,
                sampler_interval: Duration::from_secs(self.sampler_interval_secs),
                prober_port: self.prober_port,
                prober_interval: Duration::from_secs(self.prober_interval_secs),
                ..Default::default()
            },
        }
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            interval: Duration::from_secs(self.sampler_interval_secs),
            port: self.sampler_port,
            shutdown_grace: self.shutdown_grace(),
            ..Default::default()
        }
    }

    pub fn prober_settings(&self) -> ProberSettings {
        ProberSettings {
            interval: Duration::from_secs(self.prober_interval_secs),
            port: self.prober_port,
            shutdown_grace: self.shutdown_grace(),
            policy: CheckPolicy {
                management_port: self.management_port,
                timeout: Duration::from_secs(self.probe_timeout_secs),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
