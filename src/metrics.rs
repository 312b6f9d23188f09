// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the topohub agent.
//!
//! All metrics carry the prefix `topohub_infrastructure_io_` (prometheus-safe
//! version of the API group) and are exposed on `/metrics`.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Controller outcomes and durations per resource kind
//! - **DHCP Metrics** - Lease events and daemon restarts per subnet
//! - **Host Probe Metrics** - Connection attempts per management protocol
//! - **Leader Election Metrics** - Leadership state of this replica
//!
//! # Example
//!
//! ```rust,no_run
//! use topohub::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("Subnet", std::time::Duration::from_millis(40));
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

/// Namespace prefix for all topohub metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "topohub_infrastructure_io";

/// Global Prometheus metrics registry
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliations by resource type and status
///
/// Labels:
/// - `resource_type`: Kind of resource (e.g., `Subnet`, `RedfishStatus`)
/// - `status`: Outcome (`success`, `error`, `requeue`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by resource type and status",
    );
    let counter = CounterVec::new(opts, &["resource_type", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by resource type",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = HistogramVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// DHCP Metrics
// ============================================================================

/// Lease events produced by the lease reconciler
///
/// Labels:
/// - `subnet`: Subnet name
/// - `kind`: `appeared`, `changed`, or `gone`
pub static DHCP_LEASE_EVENTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_dhcp_lease_events_total"),
        "Lease events by subnet and kind",
    );
    let counter = CounterVec::new(opts, &["subnet", "kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Daemon restarts after a failed liveness probe
pub static DHCP_DAEMON_RESTARTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_dhcp_daemon_restarts_total"),
        "DHCP daemon restarts by subnet",
    );
    let counter = CounterVec::new(opts, &["subnet"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Subnets with a running supervisor
pub static DHCP_SUBNETS_ACTIVE: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_dhcp_subnets_active"),
        "Number of subnets served by this agent",
    );
    let gauge = GaugeVec::new(opts, &["node"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Host Probe Metrics
// ============================================================================

/// Host connection attempts
///
/// Labels:
/// - `protocol`: `redfish` or `ssh`
/// - `result`: `healthy` or `unhealthy`
pub static HOST_PROBES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_host_probes_total"),
        "Host connection attempts by protocol and result",
    );
    let counter = CounterVec::new(opts, &["protocol", "result"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Status record writes made by the host synchronizers
pub static HOST_STATUS_WRITES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_host_status_writes_total"),
        "Host status writes by protocol",
    );
    let counter = CounterVec::new(opts, &["protocol"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Leader Election Metrics
// ============================================================================

/// Total number of leader election events
///
/// Labels:
/// - `status`: Event type (`acquired`, `lost`)
pub static LEADER_ELECTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_elections_total"),
        "Total number of leader election events by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Current leader election status (1 = leader, 0 = follower)
pub static LEADER_STATUS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_status"),
        "Current leader election status (1 = leader, 0 = follower)",
    );
    let gauge = GaugeVec::new(opts, &["node"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful reconciliation
pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
pub fn record_reconciliation_error(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a requeue issued by an error policy
pub fn record_reconciliation_requeue(resource_type: &str) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "requeue"])
        .inc();
}

/// Record a lease event of `kind` for `subnet`
pub fn record_lease_event(subnet: &str, kind: &str) {
    DHCP_LEASE_EVENTS_TOTAL
        .with_label_values(&[subnet, kind])
        .inc();
}

/// Record a daemon restart for `subnet`
pub fn record_daemon_restart(subnet: &str) {
    DHCP_DAEMON_RESTARTS_TOTAL.with_label_values(&[subnet]).inc();
}

/// Set the number of subnets served from `node`
pub fn set_active_subnets(node: &str, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    DHCP_SUBNETS_ACTIVE
        .with_label_values(&[node])
        .set(count as f64);
}

/// Record a host connection attempt
pub fn record_host_probe(protocol: &str, healthy: bool) {
    let result = if healthy { "healthy" } else { "unhealthy" };
    HOST_PROBES_TOTAL
        .with_label_values(&[protocol, result])
        .inc();
}

/// Record a host status write
pub fn record_host_status_write(protocol: &str) {
    HOST_STATUS_WRITES_TOTAL.with_label_values(&[protocol]).inc();
}

/// Record leader election acquired
pub fn record_leader_elected(node: &str) {
    LEADER_ELECTIONS_TOTAL
        .with_label_values(&["acquired"])
        .inc();
    LEADER_STATUS.with_label_values(&[node]).set(1.0);
}

/// Record leader election lost
pub fn record_leader_lost(node: &str) {
    LEADER_ELECTIONS_TOTAL.with_label_values(&["lost"]).inc();
    LEADER_STATUS.with_label_values(&[node]).set(0.0);
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reconciliation_success() {
        record_reconciliation_success("TestSubnet", Duration::from_millis(500));

        let counter = RECONCILIATION_TOTAL.with_label_values(&["TestSubnet", "success"]);
        assert!(counter.get() > 0.0);

        let histogram = RECONCILIATION_DURATION_SECONDS.with_label_values(&["TestSubnet"]);
        assert!(histogram.get_sample_count() > 0);
    }

    #[test]
    fn test_record_lease_event() {
        record_lease_event("metrics-net", "appeared");
        record_lease_event("metrics-net", "appeared");
        let counter = DHCP_LEASE_EVENTS_TOTAL.with_label_values(&["metrics-net", "appeared"]);
        assert!(counter.get() >= 2.0);
    }

    #[test]
    fn test_record_host_probe() {
        record_host_probe("metrics-proto", false);
        let counter = HOST_PROBES_TOTAL.with_label_values(&["metrics-proto", "unhealthy"]);
        assert!(counter.get() > 0.0);
    }

    #[test]
    fn test_gather_metrics() {
        record_reconciliation_success("GatherTest", Duration::from_millis(100));
        record_daemon_restart("gather-net");

        let metrics_text = gather_metrics().unwrap();
        assert!(metrics_text.contains("topohub_infrastructure_io"));
        assert!(metrics_text.contains("reconciliations_total"));
        assert!(metrics_text.contains("dhcp_daemon_restarts_total"));
    }
}
