//! Error types for storefront-webhooks
//!
//! The crate-level [`Error`] wraps the webhook module's own `thiserror` enums
//! plus I/O and JSON failures met while starting the server.

use thiserror::Error;

pub use crate::webhook::error::{ConfigError, LedgerError, WebhookError};

/// The main error type for storefront-webhooks operations
#[derive(Error, Debug)]
pub enum Error {
    /// Event processing errors
    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    /// Configuration errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Idempotency ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// I/O errors (binding, serving)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

/// Result type alias for storefront-webhooks operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a generic error from any displayable type
    pub fn generic<S: Into<String>>(msg: S) -> Self {
        Self::Generic(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config(ConfigError::MissingSecret);
        assert!(err.to_string().starts_with("Configuration error:"));

        let err = Error::generic("listener closed");
        assert_eq!(err.to_string(), "listener closed");
    }

    #[test]
    fn test_error_from_conversions() {
        let err: Error = WebhookError::InvalidSignature.into();
        assert!(matches!(err, Error::Webhook(_)));

        let err: Error = LedgerError::Unavailable("down".into()).into();
        assert!(matches!(err, Error::Ledger(_)));

        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
