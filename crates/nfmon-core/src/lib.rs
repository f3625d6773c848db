//! Monitoring library for mobile core network functions
//!
//! This crate provides the core functionality for:
//! - Topology snapshots from the container runtime or a static file
//! - Lifecycle orchestration of per-function fetch-and-reexpose collectors
//! - Metric exposition parsing and re-encoding
//! - Container resource sampling and component health probing
//! - Health checks and observability

pub mod collector;
pub mod exposition;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod prober;
pub mod runtime;
pub mod sampler;
pub mod server;
pub mod topology;

pub use health::{
    ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse, SubsystemHealth,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
