//! Check derivation and execution

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::models::Component;

const WEB_MARKERS: [&str; 2] = ["webui", "grafana"];
const DATABASE_MARKERS: [&str; 3] = ["mongo", "redis", "mysql"];
const CONTROL_PLANE_MARKERS: [&str; 11] = [
    "amf", "smf", "nrf", "pcf", "mme", "hss", "ausf", "udm", "udr", "nssf", "bsf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Http,
    Tcp,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Http => "http",
            CheckType::Tcp => "tcp",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to probe one component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConfig {
    pub component: String,
    pub check_type: CheckType,
    /// Full URL for HTTP checks, `host:port` for TCP checks
    pub endpoint: String,
    pub timeout: Duration,
}

/// Ports and timeout used when deriving checks
#[derive(Debug, Clone)]
pub struct CheckPolicy {
    /// Port serving `/health` on control-plane functions (default: 8080)
    pub management_port: u16,
    /// Fallback port for web frontends without a known port (default: 80)
    pub web_port: u16,
    pub timeout: Duration,
}

impl Default for CheckPolicy {
    fn default() -> Self {
        Self {
            management_port: 8080,
            web_port: 80,
            timeout: Duration::from_secs(5),
        }
    }
}

impl CheckPolicy {
    /// Check for `component`, or `None` when there is nothing to connect to
    pub fn derive(&self, component: &Component) -> Option<CheckConfig> {
        let name = component.name.to_ascii_lowercase();
        let matches = |markers: &[&str]| markers.iter().any(|m| name.contains(m));
        let first_port = component.ports.first().copied();

        let (check_type, endpoint) = if matches(&WEB_MARKERS[..]) {
            let port = first_port.unwrap_or(self.web_port);
            (
                CheckType::Http,
                format!("http://{}:{}/", component.address, port),
            )
        } else if matches(&DATABASE_MARKERS[..]) {
            (
                CheckType::Tcp,
                format!("{}:{}", component.address, first_port?),
            )
        } else if matches(&CONTROL_PLANE_MARKERS[..]) {
            (
                CheckType::Http,
                format!(
                    "http://{}:{}/health",
                    component.address, self.management_port
                ),
            )
        } else {
            (
                CheckType::Tcp,
                format!("{}:{}", component.address, first_port?),
            )
        };

        Some(CheckConfig {
            component: component.name.clone(),
            check_type,
            endpoint,
            timeout: self.timeout,
        })
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status code {0}")]
    Status(u16),

    #[error("TCP connection to {endpoint} failed: {source}")]
    Tcp {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no response from {0} within timeout")]
    Timeout(String),

    #[error("failed to bind prober port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl ProbeError {
    /// The target answered, but not with success
    pub fn is_degraded(&self) -> bool {
        matches!(self, ProbeError::Status(_))
    }
}

/// Run one check; `Ok` means the component is up
pub async fn execute(client: &reqwest::Client, config: &CheckConfig) -> Result<(), ProbeError> {
    match config.check_type {
        CheckType::Http => {
            let response = client
                .get(&config.endpoint)
                .timeout(config.timeout)
                .send()
                .await?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(ProbeError::Status(status.as_u16()))
            }
        }
        CheckType::Tcp => {
            match tokio::time::timeout(config.timeout, TcpStream::connect(&config.endpoint)).await
            {
                Ok(Ok(_stream)) => Ok(()),
                Ok(Err(source)) => Err(ProbeError::Tcp {
                    endpoint: config.endpoint.clone(),
                    source,
                }),
                Err(_) => Err(ProbeError::Timeout(config.endpoint.clone())),
            }
        }
    }
}
