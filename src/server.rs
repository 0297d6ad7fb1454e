//! HTTP server assembly
//!
//! Merges the webhook route with the status endpoints, adds request tracing,
//! and serves until Ctrl-C. After the listener stops, processing tasks that
//! outlived their request are drained before returning.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::Result;
use crate::handlers::{status_router, AppState};
use crate::webhook::{webhook_router, WebhookPipeline};

/// Upper bound on waiting for in-flight processing at shutdown
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the full application router
pub fn build_app(pipeline: Arc<WebhookPipeline>) -> Router {
    let state = AppState::from_pipeline(&pipeline);
    Router::new()
        .merge(webhook_router(pipeline))
        .merge(status_router(state))
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr`, serve the pipeline until Ctrl-C, then drain its processing tasks
pub async fn serve(addr: SocketAddr, pipeline: Arc<WebhookPipeline>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, build_app(pipeline.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match tokio::time::timeout(DRAIN_TIMEOUT, pipeline.drain()).await {
        Ok(drained) => info!(drained, "Server stopped"),
        Err(_) => warn!(
            timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "Gave up draining; unfinished events stay processing until their lease expires"
        ),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        // Without a signal handler, never resolve; the process is stopped externally.
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
