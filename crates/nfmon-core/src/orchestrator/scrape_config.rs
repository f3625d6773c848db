//! Downstream Prometheus scrape configuration
//!
//! Lists one job per active collector plus the container-metrics and
//! health-checks jobs. Rewritten whenever the collector set changes.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collector::CollectorSpec;
use crate::models::{Component, DeploymentType};

/// Where a scrape job's series come from
pub mod sources {
    pub const NF_ENDPOINT: &str = "nf_endpoint";
    pub const CONTAINER_STATS: &str = "container_stats";
    pub const HEALTH_CHECK: &str = "health_check";
}

/// Parameters for the generated scrape configuration
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    /// File to write; `None` disables generation
    pub path: Option<PathBuf>,
    /// Host name the scraper uses to reach this process
    pub advertise_host: String,
    pub collector_interval: Duration,
    pub sampler_port: u16,
    pub sampler_interval: Duration,
    pub prober_port: u16,
    pub prober_interval: Duration,
    /// Value of the `monitor` external label
    pub monitor_label: String,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            path: None,
            advertise_host: "localhost".to_string(),
            collector_interval: Duration::from_secs(5),
            sampler_port: 8080,
            sampler_interval: Duration::from_secs(10),
            prober_port: 8081,
            prober_interval: Duration::from_secs(15),
            monitor_label: "nfmon".to_string(),
        }
    }
}

/// One static scrape job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapeTarget {
    pub job_name: String,
    pub target: String,
    pub metrics_path: String,
    pub scrape_interval: String,
    pub labels: BTreeMap<String, String>,
}

impl ScrapeSettings {
    /// Job for a collector's re-export endpoint
    pub fn collector_target(
        &self,
        spec: &CollectorSpec,
        component: Option<&Component>,
        deployment: Option<DeploymentType>,
    ) -> ScrapeTarget {
        let mut labels = BTreeMap::new();
        labels.insert("component".to_string(), spec.component_name.clone());
        labels.insert("nf_type".to_string(), spec.nf_type.to_string());
        labels.insert("source".to_string(), sources::NF_ENDPOINT.to_string());
        labels.insert("component_ip".to_string(), spec.upstream_address.clone());
        if let Some(component) = component.filter(|c| !c.component_type.is_empty()) {
            labels.insert(
                "component_type".to_string(),
                component.component_type.clone(),
            );
        }
        if let Some(deployment) = deployment {
            labels.insert("deployment".to_string(), deployment.to_string());
        }

        ScrapeTarget {
            job_name: format!("{}-real", spec.component_name),
            target: format!("{}:{}", self.advertise_host, spec.port),
            metrics_path: "/metrics".to_string(),
            scrape_interval: format_interval(self.collector_interval),
            labels,
        }
    }

    /// Jobs for the resource sampler and the health prober
    pub fn infrastructure_targets(&self, deployment: Option<DeploymentType>) -> Vec<ScrapeTarget> {
        let job = |name: &str, port: u16, path: &str, interval: Duration, source: &str| {
            let mut labels = BTreeMap::new();
            labels.insert("source".to_string(), source.to_string());
            if let Some(deployment) = deployment {
                labels.insert("deployment".to_string(), deployment.to_string());
            }
            ScrapeTarget {
                job_name: name.to_string(),
                target: format!("{}:{}", self.advertise_host, port),
                metrics_path: path.to_string(),
                scrape_interval: format_interval(interval),
                labels,
            }
        };

        vec![
            job(
                "container-metrics",
                self.sampler_port,
                "/container/metrics",
                self.sampler_interval,
                sources::CONTAINER_STATS,
            ),
            job(
                "health-checks",
                self.prober_port,
                "/health/metrics",
                self.prober_interval,
                sources::HEALTH_CHECK,
            ),
        ]
    }
}

/// Render a duration the way Prometheus expects it ("5s", "500ms")
pub fn format_interval(interval: Duration) -> String {
    if interval.subsec_millis() == 0 {
        format!("{}s", interval.as_secs())
    } else {
        format!("{}ms", interval.as_millis())
    }
}

#[derive(Serialize)]
struct ConfigFile<'a> {
    global: GlobalSection,
    scrape_configs: Vec<ScrapeJob<'a>>,
}

#[derive(Serialize)]
struct GlobalSection {
    scrape_interval: String,
    evaluation_interval: String,
    external_labels: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct ScrapeJob<'a> {
    job_name: &'a str,
    scrape_interval: &'a str,
    metrics_path: &'a str,
    static_configs: Vec<StaticConfig<'a>>,
}

#[derive(Serialize)]
struct StaticConfig<'a> {
    targets: Vec<&'a str>,
    labels: &'a BTreeMap<String, String>,
}

/// Render the full YAML document
pub fn render(
    targets: &[ScrapeTarget],
    deployment: Option<DeploymentType>,
    monitor_label: &str,
) -> Result<String, serde_yaml::Error> {
    let mut external_labels = BTreeMap::new();
    external_labels.insert("monitor".to_string(), monitor_label.to_string());
    if let Some(deployment) = deployment {
        external_labels.insert("deployment_type".to_string(), deployment.to_string());
    }

    let file = ConfigFile {
        global: GlobalSection {
            scrape_interval: "5s".to_string(),
            evaluation_interval: "5s".to_string(),
            external_labels,
        },
        scrape_configs: targets
            .iter()
            .map(|t| ScrapeJob {
                job_name: &t.job_name,
                scrape_interval: &t.scrape_interval,
                metrics_path: &t.metrics_path,
                static_configs: vec![StaticConfig {
                    targets: vec![&t.target],
                    labels: &t.labels,
                }],
            })
            .collect(),
    };

    serde_yaml::to_string(&file)
}

/// Replace `path` with `contents` without exposing a half-written file
pub async fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move scrape config into {}", path.display()))?;

    Ok(())
}
