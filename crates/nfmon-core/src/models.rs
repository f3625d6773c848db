//! Core data models shared by the orchestrator and the collectors

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A component reported by the topology source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    /// Free-form role tag, e.g. "5G-Control-Plane"
    #[serde(rename = "type", default)]
    pub component_type: String,
    /// Address the component can be reached on (IP or resolvable host name)
    pub address: String,
    pub running: bool,
    /// Container ports, used to pick a health probe target
    #[serde(default)]
    pub ports: Vec<u16>,
}

impl Component {
    pub fn new(
        name: impl Into<String>,
        component_type: impl Into<String>,
        address: impl Into<String>,
        running: bool,
    ) -> Self {
        Self {
            name: name.into(),
            component_type: component_type.into(),
            address: address.into(),
            running,
            ports: Vec::new(),
        }
    }

    pub fn with_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.ports = ports.into_iter().collect();
        self
    }
}

/// Generation of the mobile core a deployment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentType {
    #[serde(rename = "4G")]
    FourG,
    #[serde(rename = "5G")]
    FiveG,
    #[serde(rename = "MIXED")]
    Mixed,
}

const FOUR_G_MARKERS: &[&str] = &["mme", "hss", "sgwc", "sgwu", "pcrf"];
const FIVE_G_MARKERS: &[&str] = &["amf", "nrf", "udm", "udr", "ausf", "nssf", "bsf", "pcf"];

impl DeploymentType {
    /// Infer the deployment generation from component names
    pub fn detect<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut has_4g = false;
        let mut has_5g = false;

        for name in names {
            let name = name.to_ascii_lowercase();
            has_4g |= FOUR_G_MARKERS.iter().any(|m| name.contains(m));
            has_5g |= FIVE_G_MARKERS.iter().any(|m| name.contains(m));
        }

        match (has_4g, has_5g) {
            (true, false) => DeploymentType::FourG,
            (false, true) => DeploymentType::FiveG,
            _ => DeploymentType::Mixed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentType::FourG => "4G",
            DeploymentType::FiveG => "5G",
            DeploymentType::Mixed => "MIXED",
        }
    }
}

impl fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time view of every known component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub deployment_type: DeploymentType,
    pub components: HashMap<String, Component>,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            deployment_type: DeploymentType::Mixed,
            components: HashMap::new(),
        }
    }
}

impl Topology {
    /// Build a topology, deriving the deployment type from the component names
    pub fn from_components(components: impl IntoIterator<Item = Component>) -> Self {
        let components: HashMap<String, Component> = components
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        let deployment_type = DeploymentType::detect(components.keys().map(String::as_str));

        Self {
            deployment_type,
            components,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    /// Components currently reported as running
    pub fn running(&self) -> impl Iterator<Item = &Component> {
        self.components.values().filter(|c| c.running)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.components.get(name).is_some_and(|c| c.running)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Network function roles that expose their own metrics endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NfType {
    Amf,
    Smf,
    Pcf,
    Upf,
    Mme,
    Pcrf,
}

impl NfType {
    pub const ALL: [NfType; 6] = [
        NfType::Amf,
        NfType::Smf,
        NfType::Pcf,
        NfType::Upf,
        NfType::Mme,
        NfType::Pcrf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NfType::Amf => "amf",
            NfType::Smf => "smf",
            NfType::Pcf => "pcf",
            NfType::Upf => "upf",
            NfType::Mme => "mme",
            NfType::Pcrf => "pcrf",
        }
    }

    /// First port tried when assigning a re-export endpoint for this role
    pub fn base_port(&self) -> u16 {
        match self {
            NfType::Amf => 9091,
            NfType::Smf => 9092,
            NfType::Pcf => 9093,
            NfType::Upf => 9094,
            NfType::Mme => 9095,
            NfType::Pcrf => 9096,
        }
    }
}

impl fmt::Display for NfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource usage sampled from the container runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub container_id: String,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub block_read: u64,
    pub block_write: u64,
    pub pids: u64,
    pub timestamp: i64,
    /// Stats categories that could not be read from this sample
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
