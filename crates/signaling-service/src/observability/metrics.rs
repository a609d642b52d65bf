//! Metrics definitions for the signaling server.
//!
//! All metrics follow Prometheus naming conventions:
//! - `ss_` prefix for the signaling server
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! - `method`: bounded by `media_protocol::methods` (~20 values)
//! - `status`: `success` or an `SsError::kind()` value (7 values)
//! - `media_node`: bounded by the configured node list

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and serve `/metrics` on `listen`.
///
/// Must be called from within the tokio runtime, before any metrics are
/// recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed)
/// or the listener cannot bind.
pub fn init_metrics_exporter(listen: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        // Media node RPC buckets - internal service call (default timeout 3s)
        .set_buckets_for_metric(
            Matcher::Prefix("ss_rpc".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 3.000,
            ],
        )
        .map_err(|e| format!("Failed to set RPC latency buckets: {e}"))?
        .install()
        .map_err(|e| format!("Failed to install Prometheus metrics exporter: {e}"))
}

// ============================================================================
// RPC Metrics
// ============================================================================

/// Record a completed request to a media node.
///
/// Metric: `ss_rpc_requests_total`, `ss_rpc_request_duration_seconds`
/// Labels: `method`, `status`
pub fn record_rpc_request(method: &str, status: &str, duration: Duration) {
    histogram!("ss_rpc_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("ss_rpc_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Media Node Metrics
// ============================================================================

/// Record the last load sample reported by a media node.
///
/// Metric: `ss_media_node_load`
/// Labels: `media_node`
pub fn set_media_node_load(media_node_id: &str, load: f64) {
    gauge!("ss_media_node_load",
        "media_node" => media_node_id.to_string()
    )
    .set(load);
}

// ============================================================================
// Routing Metrics
// ============================================================================

/// Record the outcome of a router provisioning attempt.
///
/// Metric: `ss_router_provisioning_total`
/// Labels: `status`
pub fn record_router_provisioning(status: &str) {
    counter!("ss_router_provisioning_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a newly created pipe transport pair.
///
/// Metric: `ss_pipe_transport_pairs_created_total`
pub fn record_pipe_transport_pair_created() {
    counter!("ss_pipe_transport_pairs_created_total").increment(1);
}
