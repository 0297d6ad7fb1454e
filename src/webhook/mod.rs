//! Payment Webhook Ingestion
//!
//! Receives at-least-once, possibly duplicated, possibly out-of-order
//! notifications from the payment processor and applies each one's side
//! effects exactly once:
//!
//! - **Signature Verification**: HMAC-SHA512 over the raw body, hex encoded,
//!   compared in constant time
//! - **Event Identity**: deterministic ids from the sender id, the transaction
//!   reference, or a content hash
//! - **Idempotency Ledger**: atomic check-and-reserve per event id
//! - **Validation**: typed event shapes with a generic fallback
//! - **Dispatch**: per-type handlers with error and panic isolation
//! - **Structured Logging**: one span per delivery, secrets and emails redacted
//!
//! # Architecture
//!
//! ```text
//! Request -> Parse -> Identity -> Signature -> Ledger -> Validate -> Dispatch -> Record
//!              |                      |           |                                |
//!              v                      v           v                                v
//!             400                    400     202 (duplicate)                  202 (always)
//! ```
//!
//! # Security
//!
//! - Signing secret loaded from `STOREFRONT_WEBHOOK_SECRET`
//! - Verification can only be bypassed outside production, and a production
//!   configuration refuses to load without a secret
//! - Raw body bytes are verified before any re-serialisation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storefront_webhooks::domain::Collaborators;
//! use storefront_webhooks::webhook::{
//!     webhook_router, InMemoryLedger, WebhookConfig, WebhookPipeline,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = WebhookConfig::from_env()?;
//!     let pipeline = WebhookPipeline::new(
//!         config,
//!         Arc::new(InMemoryLedger::new()),
//!         Collaborators::in_memory(),
//!     );
//!
//!     let app = webhook_router(Arc::new(pipeline));
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3001").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod identity;
pub mod ledger;
pub mod logger;
pub mod receiver;
pub mod redact;
pub mod signature;
pub mod validation;

// Re-export commonly used items
pub use config::{ExecutionMode, WebhookConfig};
pub use dispatcher::{CaseOutcome, DispatchResult, EventDispatcher};
pub use error::{ConfigError, LedgerError, WebhookError, WebhookResult};
pub use events::{EventKind, GenericReason, PaymentEvent};
pub use identity::{resolve_id, EventId, IdSource};
pub use ledger::{
    IdempotencyDecision, IdempotencyLedger, InMemoryLedger, ProcessingStatus, Reservation,
    WebhookEventRecord,
};
pub use logger::{CaseLogger, EventLogger};
pub use receiver::{
    webhook_handler, webhook_router, AckResponse, IngestOutcome, WebhookPipeline, WEBHOOK_PATH,
};
pub use signature::{SignatureCheck, SignatureVerifier};
pub use validation::{validate, ValidationReport};
