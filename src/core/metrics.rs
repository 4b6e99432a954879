// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the control plane.
//!
//! Metrics are registered once, globally, via `once_cell::sync::Lazy`.

use once_cell::sync::Lazy;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
};

/// Whether this node currently believes itself to be master for its guild.
pub static IS_MASTER: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("hostctl_is_master", "1 if this node is currently master, else 0.").unwrap()
});

/// Number of hosts currently tracked by the local registry, labeled by status.
pub static HOSTS_BY_STATUS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "hostctl_hosts_by_status",
        "Number of locally-registered hosts in each lifecycle state.",
        &["status"]
    )
    .unwrap()
});

/// Total UDP datagrams received by the ingress listener.
pub static UDP_DATAGRAMS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hostctl_udp_datagrams_total",
        "Total UDP datagrams received, labeled by outcome.",
        &["outcome"]
    )
    .unwrap()
});

/// Total RPC calls issued by this node, labeled by method and outcome.
pub static RPC_CALLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hostctl_rpc_calls_total",
        "Total RPC calls issued, labeled by method and outcome.",
        &["method", "outcome"]
    )
    .unwrap()
});

/// Latency of a synchronous RPC round-trip.
pub static RPC_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "hostctl_rpc_latency_seconds",
        "Latency of synchronous RPC round-trips in seconds."
    )
    .unwrap()
});

/// Total scheduler-initiated actions, labeled by action kind.
pub static SCHEDULER_ACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hostctl_scheduler_actions_total",
        "Total scheduler-initiated lifecycle actions, labeled by kind.",
        &["action"]
    )
    .unwrap()
});

/// Total hosts force-killed due to a hung heartbeat.
pub static HUNG_HOST_RECOVERIES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "hostctl_hung_host_recoveries_total",
        "Total number of hosts force-killed after a heartbeat timeout."
    )
    .unwrap()
});

/// Total mastership changes observed by this node (won or lost).
pub static MASTERSHIP_CHANGES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "hostctl_mastership_changes_total",
        "Total number of times this node's mastership flag flipped."
    )
    .unwrap()
});

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
