// src/server/metrics_server.rs

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::core::metrics::gather_metrics;
use crate::core::state::HostctlState;

/// Handles HTTP requests to the /metrics endpoint.
async fn metrics_handler(state: Arc<HostctlState>) -> impl IntoResponse {
    crate::core::metrics::HOSTS_BY_STATUS.reset();
    for host in state.registry.list() {
        crate::core::metrics::HOSTS_BY_STATUS
            .with_label_values(&[&host.status.to_string()])
            .inc();
    }
    crate::core::metrics::IS_MASTER.set(if state.coordinator.is_master() { 1.0 } else { 0.0 });

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs a simple HTTP server to expose Prometheus metrics on /metrics.
pub async fn run_metrics_server(state: Arc<HostctlState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let port = state.config.metrics_port;
    let app = Router::new().route("/metrics", get(move || metrics_handler(state.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "prometheus metrics server listening on /metrics");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(port, error = %e, "failed to bind metrics server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("metrics server shutting down");
        })
        .await
    {
        error!(error = %e, "metrics server exited with an error");
    }
}
