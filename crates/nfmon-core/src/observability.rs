//! Observability for the monitor itself
//!
//! Provides:
//! - Prometheus self-metrics (reconciliations, collector lifecycle, fetch and probe latency)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for network round trips (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    reconciliations: IntCounter,
    collectors_active: IntGauge,
    collector_starts: IntCounter,
    collector_stops: IntCounter,
    collector_start_failures: IntCounter,
    topology_errors: IntCounter,
    components_running: IntGauge,
    fetch_latency_seconds: Histogram,
    fetch_errors: IntCounter,
    sampler_sweep_seconds: Histogram,
    containers_sampled: IntGauge,
    probe_latency_seconds: Histogram,
    probe_failures: IntCounter,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            reconciliations: register_int_counter!(
                "nfmon_reconciliations_total",
                "Number of reconcile passes run by the orchestrator"
            )
            .expect("Failed to register reconciliations_total"),

            collectors_active: register_int_gauge!(
                "nfmon_collectors_active",
                "Number of fetch-and-reexpose collectors currently running"
            )
            .expect("Failed to register collectors_active"),

            collector_starts: register_int_counter!(
                "nfmon_collector_starts_total",
                "Collectors started"
            )
            .expect("Failed to register collector_starts_total"),

            collector_stops: register_int_counter!(
                "nfmon_collector_stops_total",
                "Collectors cancelled"
            )
            .expect("Failed to register collector_stops_total"),

            collector_start_failures: register_int_counter!(
                "nfmon_collector_start_failures_total",
                "Collector starts that failed, usually because the port could not be bound"
            )
            .expect("Failed to register collector_start_failures_total"),

            topology_errors: register_int_counter!(
                "nfmon_topology_errors_total",
                "Topology snapshots that could not be read"
            )
            .expect("Failed to register topology_errors_total"),

            components_running: register_int_gauge!(
                "nfmon_components_running",
                "Running components in the latest topology snapshot"
            )
            .expect("Failed to register components_running"),

            fetch_latency_seconds: register_histogram!(
                "nfmon_upstream_fetch_latency_seconds",
                "Time spent fetching upstream metrics endpoints",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register upstream_fetch_latency_seconds"),

            fetch_errors: register_int_counter!(
                "nfmon_upstream_fetch_errors_total",
                "Upstream fetches that failed"
            )
            .expect("Failed to register upstream_fetch_errors_total"),

            sampler_sweep_seconds: register_histogram!(
                "nfmon_sampler_sweep_seconds",
                "Time spent sampling container resources for all running components",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sampler_sweep_seconds"),

            containers_sampled: register_int_gauge!(
                "nfmon_containers_sampled",
                "Containers sampled in the latest sweep"
            )
            .expect("Failed to register containers_sampled"),

            probe_latency_seconds: register_histogram!(
                "nfmon_probe_latency_seconds",
                "Health probe round-trip time",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register probe_latency_seconds"),

            probe_failures: register_int_counter!(
                "nfmon_probe_failures_total",
                "Health probes that did not report the component up"
            )
            .expect("Failed to register probe_failures_total"),
        }
    }
}

/// Handle to the monitor's self-metrics
///
/// Clones share the same process-wide metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn inc_reconciliations(&self) {
        self.inner().reconciliations.inc();
    }

    pub fn set_collectors_active(&self, count: usize) {
        self.inner().collectors_active.set(count as i64);
    }

    pub fn inc_collector_starts(&self) {
        self.inner().collector_starts.inc();
    }

    pub fn inc_collector_stops(&self) {
        self.inner().collector_stops.inc();
    }

    pub fn inc_collector_start_failures(&self) {
        self.inner().collector_start_failures.inc();
    }

    pub fn inc_topology_errors(&self) {
        self.inner().topology_errors.inc();
    }

    pub fn set_components_running(&self, count: usize) {
        self.inner().components_running.set(count as i64);
    }

    pub fn observe_fetch_latency(&self, duration_secs: f64) {
        self.inner().fetch_latency_seconds.observe(duration_secs);
    }

    pub fn inc_fetch_errors(&self) {
        self.inner().fetch_errors.inc();
    }

    /// Record a completed sampler sweep
    pub fn observe_sampler_sweep(&self, duration_secs: f64, containers: usize) {
        self.inner().sampler_sweep_seconds.observe(duration_secs);
        self.inner().containers_sampled.set(containers as i64);
    }

    pub fn observe_probe_latency(&self, duration_secs: f64) {
        self.inner().probe_latency_seconds.observe(duration_secs);
    }

    pub fn inc_probe_failures(&self) {
        self.inner().probe_failures.inc();
    }
}

/// Structured logger for monitor lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, components: usize) {
        info!(
            event = "monitor_started",
            instance = %self.instance,
            version = %version,
            components = components,
            "NF monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            instance = %self.instance,
            reason = %reason,
            "NF monitor shutting down"
        );
    }

    pub fn log_collector_started(&self, component: &str, nf_type: &str, port: u16, upstream: &str) {
        info!(
            event = "collector_started",
            instance = %self.instance,
            component = %component,
            nf_type = %nf_type,
            port = port,
            upstream = %upstream,
            "Started metrics collector"
        );
    }

    pub fn log_collector_stopped(&self, component: &str, nf_type: &str, reason: &str) {
        info!(
            event = "collector_stopped",
            instance = %self.instance,
            component = %component,
            nf_type = %nf_type,
            reason = %reason,
            "Stopped metrics collector"
        );
    }

    pub fn log_collector_failed(&self, component: &str, nf_type: &str, error: &str) {
        warn!(
            event = "collector_start_failed",
            instance = %self.instance,
            component = %component,
            nf_type = %nf_type,
            error = %error,
            "Failed to start metrics collector, will retry on next reconcile"
        );
    }

    pub fn log_topology_change(&self, started: usize, stopped: usize, active: usize) {
        info!(
            event = "topology_changed",
            instance = %self.instance,
            started = started,
            stopped = stopped,
            active = active,
            "Collector set reconciled"
        );
    }

    pub fn log_scrape_config(&self, path: &str, targets: usize, success: bool) {
        if success {
            info!(
                event = "scrape_config_written",
                instance = %self.instance,
                path = %path,
                targets = targets,
                "Scrape configuration updated"
            );
        } else {
            warn!(
                event = "scrape_config_failed",
                instance = %self.instance,
                path = %path,
                targets = targets,
                "Failed to write scrape configuration"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_metrics_handles_share_registry() {
        let first = MonitorMetrics::new();
        let second = MonitorMetrics::new();

        let before = first.inner().collector_starts.get();
        second.inc_collector_starts();
        assert!(first.inner().collector_starts.get() > before);

        first.set_collectors_active(3);
        first.observe_fetch_latency(0.02);
        first.observe_sampler_sweep(0.1, 4);
        first.observe_probe_latency(0.005);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("nfmon-test");
        assert_eq!(logger.instance, "nfmon-test");
    }
}
