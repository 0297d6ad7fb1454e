//! Status and health check handlers for the webhook service.
//!
//! - `/health` - Liveness probe
//! - `/ready` - Readiness probe; fails while the ledger is unreachable
//! - `/status` - Uptime, webhook outcome counters, latency and memory
//! - `/metrics` - Prometheus text exposition
//!
//! # Architecture
//!
//! ```text
//! HTTP Request ──> Axum Router ──> status_handler ──> AppState
//!                                        │                │
//!                                        ▼                ▼
//!                              StatusResponse    WebhookMetrics
//!                                        │         + Ledger
//!                                        ▼
//!                                   JSON Response
//! ```
//!
//! # Example Response
//!
//! ```json
//! {
//!   "version": "0.1.0",
//!   "name": "storefront-webhooks",
//!   "mode": "production",
//!   "uptime_seconds": 3600,
//!   "webhooks": {
//!     "received": 1024,
//!     "processed": 1001,
//!     "failed": 3,
//!     "duplicates": 20,
//!     "processing_latency": { "p50_ms": 4.1, "p95_ms": 18.0, "p99_ms": 42.7 }
//!   },
//!   "memory": { "rss_bytes": 52428800, "virtual_bytes": 268435456 },
//!   "status": "running"
//! }
//! ```

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, instrument, warn};

use crate::metrics::{MetricsSnapshot, WebhookMetrics};
use crate::webhook::{ExecutionMode, IdempotencyLedger, WebhookPipeline};

/// Server version from Cargo.toml
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name from Cargo.toml
pub const SERVER_NAME: &str = env!("CARGO_PKG_NAME");

// ============================================================================
// Response Types
// ============================================================================

/// Probe response for `/health` and `/ready`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy`, `ready` or `unavailable`
    pub status: String,
}

impl HealthResponse {
    fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self::new("healthy")
    }
}

/// Detailed service status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Server version (from Cargo.toml)
    pub version: String,

    /// Server name
    pub name: String,

    /// Execution mode
    pub mode: String,

    /// Uptime in seconds
    pub uptime_seconds: u64,

    /// Webhook outcome counters and processing latency
    pub webhooks: MetricsSnapshot,

    /// Process memory
    pub memory: MemoryMetrics,

    /// Always "running" if responding
    pub status: String,

    /// ISO8601 timestamp of when status was generated
    pub timestamp: String,
}

/// Memory usage metrics collected from sysinfo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    /// Resident Set Size (bytes)
    pub rss_bytes: u64,

    /// Virtual memory size (bytes)
    pub virtual_bytes: u64,
}

// ============================================================================
// Application State
// ============================================================================

/// State shared by the status endpoints
#[derive(Clone)]
pub struct AppState {
    start_time: Instant,
    mode: ExecutionMode,
    metrics: Arc<WebhookMetrics>,
    ledger: Arc<dyn IdempotencyLedger>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("start_time", &self.start_time)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create state over explicit components
    pub fn new(
        mode: ExecutionMode,
        metrics: Arc<WebhookMetrics>,
        ledger: Arc<dyn IdempotencyLedger>,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            mode,
            metrics,
            ledger,
        }
    }

    /// State sharing the pipeline's metrics and ledger
    pub fn from_pipeline(pipeline: &WebhookPipeline) -> Self {
        Self::new(
            pipeline.config().mode(),
            pipeline.metrics(),
            pipeline.ledger(),
        )
    }

    /// Server uptime in seconds
    #[inline]
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Metrics registry
    #[inline]
    pub fn metrics(&self) -> &WebhookMetrics {
        &self.metrics
    }
}

// ============================================================================
// System Metrics Collection
// ============================================================================

/// Collect memory metrics for the current process.
///
/// Returns zeros if the process cannot be found.
fn collect_memory_metrics() -> MemoryMetrics {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();

    // sysinfo 0.33 API: refresh_processes with ProcessesToUpdate
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    match system.process(pid) {
        Some(process) => MemoryMetrics {
            rss_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
        },
        None => {
            debug!("Could not find current process in sysinfo");
            MemoryMetrics::default()
        }
    }
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// `GET /health`
///
/// Always `200 OK` with `{"status": "healthy"}` while the process serves.
#[instrument(skip_all)]
pub async fn health_handler() -> impl IntoResponse {
    debug!("Health check requested");
    (StatusCode::OK, Json(HealthResponse::default()))
}

/// `GET /ready`
///
/// # Response
/// - `200 OK` - Ledger reachable
/// - `503 Service Unavailable` - Ledger ping failed
#[instrument(skip_all)]
pub async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    debug!("Readiness check requested");
    match state.ledger.ping().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse::new("ready"))),
        Err(e) => {
            warn!(error = %e, "Readiness check failed: ledger unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse::new("unavailable")),
            )
        }
    }
}

/// `GET /status`
///
/// ```bash
/// curl http://localhost:3001/status
/// ```
#[instrument(skip_all)]
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    debug!("Status check requested");

    let response = StatusResponse {
        version: SERVER_VERSION.to_string(),
        name: SERVER_NAME.to_string(),
        mode: state.mode.as_str().to_string(),
        uptime_seconds: state.uptime_seconds(),
        webhooks: state.metrics.snapshot(),
        memory: collect_memory_metrics(),
        status: "running".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(response))
}

/// `GET /metrics`
#[instrument(skip_all)]
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus_format(),
    )
}

// ============================================================================
// Router Setup
// ============================================================================

/// Router with every health and status endpoint
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use storefront_webhooks::handlers::{status_router, AppState};
/// use storefront_webhooks::metrics::WebhookMetrics;
/// use storefront_webhooks::webhook::{ExecutionMode, InMemoryLedger};
///
/// let state = AppState::new(
///     ExecutionMode::Development,
///     Arc::new(WebhookMetrics::new()),
///     Arc::new(InMemoryLedger::new()),
/// );
/// let app: axum::Router = status_router(state);
/// ```
pub fn status_router(state: AppState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(readiness_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================
