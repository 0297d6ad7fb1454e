//! Storefront Webhooks - Payment Webhook Ingestion Service
//!
//! This crate receives asynchronous notifications from the storefront's
//! payment processor and applies their side effects exactly once.
//!
//! # Features
//!
//! - **Authenticity**: HMAC-SHA512 signature verification over the raw body
//! - **Idempotency**: deterministic event ids and an atomic reservation ledger
//! - **Isolation**: handler errors and panics become `failed` ledger rows
//! - **Fail-safe responses**: only `400` (malformed or unauthenticated) or `202`
//! - **Observability**: per-delivery tracing spans with redaction, Prometheus
//!   counters, `/status` with latency percentiles
//!
//! # Architecture
//!
//! ```text
//! Payment Processor ──▶ POST /webhooks/payments ──▶ WebhookPipeline
//!                                                      │
//!                        ┌──────────────┬──────────────┼───────────────┐
//!                        ▼              ▼              ▼               ▼
//!                  ┌──────────┐  ┌────────────┐  ┌───────────┐  ┌────────────┐
//!                  │Signature │  │ Identity + │  │ Validator │  │ Dispatcher │
//!                  │ Verifier │  │   Ledger   │  └───────────┘  └─────┬──────┘
//!                  └──────────┘  └────────────┘                       │
//!                                                                     ▼
//!                                                 Orders, Subscriptions, Notifier
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storefront_webhooks::domain::Collaborators;
//! use storefront_webhooks::webhook::{InMemoryLedger, WebhookConfig, WebhookPipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WebhookConfig::from_env()?;
//!     let pipeline = Arc::new(WebhookPipeline::new(
//!         config,
//!         Arc::new(InMemoryLedger::new()),
//!         Collaborators::in_memory(),
//!     ));
//!
//!     storefront_webhooks::server::serve("127.0.0.1:3001".parse()?, pipeline).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod domain;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod server;
pub mod webhook;

// Re-exports for convenience
pub use error::{Error, Result};
pub use metrics::WebhookMetrics;
pub use webhook::{WebhookConfig, WebhookPipeline};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
