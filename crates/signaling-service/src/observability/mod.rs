//! Observability module for the signaling server.
//!
//! All instrumentation uses explicit `tracing` targets (`ss.<component>`) and
//! safe field allow-listing; shared secrets never reach a log line.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `ss_rpc_requests_total` | Counter | `method`, `status` | Media node request outcomes |
//! | `ss_rpc_request_duration_seconds` | Histogram | `method` | Media node request latency |
//! | `ss_media_node_load` | Gauge | `media_node` | Last load sample per node |
//! | `ss_router_provisioning_total` | Counter | `status` | `MediaService::get_router` outcomes |
//! | `ss_pipe_transport_pairs_created_total` | Counter | none | Inter-router pipe pairs |

pub mod metrics;

pub use metrics::{
    init_metrics_exporter, record_pipe_transport_pair_created, record_router_provisioning,
    record_rpc_request, set_media_node_load,
};
