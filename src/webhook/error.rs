//! Webhook Error Types
//!
//! Error enums for configuration, the idempotency ledger and event processing.
//! None of these reach the payment processor directly: the receiver maps the
//! outcome of an ingestion to either `400` or `202`.

use thiserror::Error;

/// Errors raised while processing a single webhook event
#[derive(Error, Debug)]
pub enum WebhookError {
    /// The body is not JSON, or not a JSON object
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The signature header did not match the body
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// The signature header was absent
    #[error("Missing webhook signature header")]
    MissingSignature,

    /// The idempotency ledger failed
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A domain collaborator returned an error
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// A handler panicked; the panic was contained
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    /// A replay request was refused
    #[error("Replay rejected: {0}")]
    ReplayRejected(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type for webhook processing
pub type WebhookResult<T> = std::result::Result<T, WebhookError>;

/// Errors raised by an [`IdempotencyLedger`](crate::webhook::IdempotencyLedger)
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The backing store could not be reached
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be read back
    #[error("Corrupt ledger record for {event_id}: {reason}")]
    Corrupt {
        /// Event the record belongs to
        event_id: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Result type for ledger operations
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Startup-time configuration errors. These are fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Production mode without a signing secret
    #[error("STOREFRONT_WEBHOOK_SECRET must be set in production mode")]
    MissingSecret,

    /// Production mode with signature verification disabled
    #[error("Signature verification cannot be bypassed in production mode")]
    BypassInProduction,

    /// Unrecognised execution mode
    #[error("Invalid execution mode: {0} (expected production, development or test)")]
    InvalidMode(String),

    /// Unparseable or zero processing timeout
    #[error("Invalid processing timeout: {0}")]
    InvalidTimeout(String),

    /// Signature header name is not a valid HTTP header name
    #[error("Invalid signature header name: {0}")]
    InvalidHeader(String),
}

/// Result type for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
