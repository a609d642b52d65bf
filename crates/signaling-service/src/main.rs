//! Signaling Server
//!
//! Media control plane of the conferencing signaling server.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics exporter
//! 3. Build the media node pool with the WebSocket connector
//! 4. Wait for shutdown signal
//! 5. Close every media node (routers, then connections)

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use signaling_service::config::Config;
use signaling_service::observability::init_metrics_exporter;
use signaling_service::rpc::WebSocketConnector;
use signaling_service::MediaService;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for queued close notifications to reach the media nodes.
const SHUTDOWN_FLUSH_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signaling_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Signaling Server");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        media_nodes = config.media_nodes.len(),
        media_node_secure = config.media_node_secure,
        request_timeout_ms = config.request_timeout.as_millis(),
        handshake_timeout_ms = config.handshake_timeout.as_millis(),
        strategies = ?config.strategies,
        geo_threshold_km = config.geo_threshold_km,
        load_threshold = config.load_threshold,
        geoip_entries = config.geoip_table.len(),
        metrics_bind_address = %config.metrics_bind_address,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics exporter...");
    init_metrics_exporter(config.metrics_bind_address).map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics exporter");
        e
    })?;
    info!(addr = %config.metrics_bind_address, "Prometheus metrics exporter started");

    let service = MediaService::from_config(&config, Arc::new(WebSocketConnector)).map_err(|e| {
        error!(error = %e, "Failed to build media node pool");
        e
    })?;
    for node in service.media_nodes() {
        info!(
            media_node_id = %node.id(),
            hostname = %node.hostname(),
            port = node.port(),
            "Media node registered"
        );
    }

    info!("Signaling Server running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, closing media nodes...");
    service.close();

    // Give connection drivers time to flush close notifications
    tokio::time::sleep(SHUTDOWN_FLUSH_GRACE).await;

    info!("Signaling Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
