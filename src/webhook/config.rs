//! Webhook Configuration
//!
//! Loaded once at startup from environment variables. A production
//! configuration without a signing secret, or with signature verification
//! bypassed, is rejected here, so neither state is reachable per request.
//!
//! # Environment Variables
//!
//! - `STOREFRONT_ENV`: `production` (default), `development` or `test`
//! - `STOREFRONT_WEBHOOK_SECRET`: shared signing secret (required in production)
//! - `STOREFRONT_WEBHOOK_SKIP_VERIFY`: `true` to bypass verification outside production
//! - `STOREFRONT_WEBHOOK_SIGNATURE_HEADER`: signature header name
//! - `STOREFRONT_WEBHOOK_TIMEOUT_MS`: processing timeout in milliseconds
//! - `STOREFRONT_WEBHOOK_STALE_AFTER_MS`: age after which a `processing`
//!   reservation is considered abandoned and may be reclaimed

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::webhook::error::{ConfigError, ConfigResult};

/// Header the payment processor puts the body signature in
pub const DEFAULT_SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Upper bound on validation plus dispatch for one request
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(10);

/// Lease on a `processing` reservation before it may be reclaimed
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Execution mode of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Signatures are always enforced
    #[default]
    Production,
    /// Local development; verification may be bypassed
    Development,
    /// Automated tests; verification may be bypassed
    Test,
}

impl ExecutionMode {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
            Self::Test => "test",
        }
    }

    /// Whether this is production mode
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated webhook configuration
///
/// Every constructor runs the production guard, so a value of this type is
/// always a legal configuration.
#[derive(Clone)]
pub struct WebhookConfig {
    mode: ExecutionMode,
    secret: Option<Vec<u8>>,
    skip_verification: bool,
    signature_header: String,
    processing_timeout: Duration,
    stale_after: Duration,
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("mode", &self.mode)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("skip_verification", &self.skip_verification)
            .field("signature_header", &self.signature_header)
            .field("processing_timeout", &self.processing_timeout)
            .field("stale_after", &self.stale_after)
            .finish()
    }
}

impl WebhookConfig {
    /// Create a configuration for the given mode and secret
    ///
    /// # Errors
    ///
    /// `ConfigError::MissingSecret` in production mode without a non-empty secret.
    pub fn new(mode: ExecutionMode, secret: Option<String>) -> ConfigResult<Self> {
        Self {
            mode,
            secret: secret
                .filter(|s| !s.trim().is_empty())
                .map(String::into_bytes),
            skip_verification: false,
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
            stale_after: DEFAULT_STALE_AFTER,
        }
        .validated()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_env_with_mode(None)
    }

    /// Load configuration from environment variables, optionally forcing the mode
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; callers should treat it as fatal.
    pub fn from_env_with_mode(mode_override: Option<ExecutionMode>) -> ConfigResult<Self> {
        let mode = match mode_override {
            Some(mode) => mode,
            None => env::var("STOREFRONT_ENV")
                .ok()
                .map(|v| v.parse::<ExecutionMode>())
                .transpose()?
                .unwrap_or_default(),
        };

        let secret = env::var("STOREFRONT_WEBHOOK_SECRET").ok();

        let skip_verification = env::var("STOREFRONT_WEBHOOK_SKIP_VERIFY")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let mut config = Self::new(mode, secret)?.with_skip_verification(skip_verification)?;

        if let Ok(header) = env::var("STOREFRONT_WEBHOOK_SIGNATURE_HEADER") {
            config = config.with_signature_header(header)?;
        }

        if let Some(timeout) = env_millis("STOREFRONT_WEBHOOK_TIMEOUT_MS")? {
            config = config.with_processing_timeout(timeout);
        }
        if let Some(lease) = env_millis("STOREFRONT_WEBHOOK_STALE_AFTER_MS")? {
            config = config.with_stale_after(lease)?;
        }

        info!(
            mode = %config.mode,
            signature_header = %config.signature_header,
            timeout_ms = config.processing_timeout.as_millis() as u64,
            stale_after_ms = config.stale_after.as_millis() as u64,
            "Webhook configuration loaded"
        );
        if config.allows_bypass() {
            warn!(mode = %config.mode, "Webhook signature verification is BYPASSED");
        }

        Ok(config)
    }

    /// Configuration used by tests: test mode with a known secret, verification enforced
    pub fn test_config() -> Self {
        Self {
            mode: ExecutionMode::Test,
            secret: Some(b"test-webhook-secret".to_vec()),
            skip_verification: false,
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            processing_timeout: Duration::from_secs(5),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Enable or disable the verification bypass
    ///
    /// # Errors
    ///
    /// `ConfigError::BypassInProduction` when enabling it in production mode.
    pub fn with_skip_verification(mut self, skip: bool) -> ConfigResult<Self> {
        self.skip_verification = skip;
        self.validated()
    }

    /// Override the signature header name
    pub fn with_signature_header(mut self, header: impl Into<String>) -> ConfigResult<Self> {
        let header = header.into().trim().to_ascii_lowercase();
        http::HeaderName::from_bytes(header.as_bytes())
            .map_err(|e| ConfigError::InvalidHeader(format!("{header}: {e}")))?;
        self.signature_header = header;
        Ok(self)
    }

    /// Override the processing timeout
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Override the lease on `processing` reservations
    ///
    /// Should exceed the longest expected handler run: a reservation older
    /// than this is treated as abandoned by redelivery and replay.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidTimeout` for a zero lease.
    pub fn with_stale_after(mut self, lease: Duration) -> ConfigResult<Self> {
        if lease.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "stale-after lease cannot be 0".to_string(),
            ));
        }
        self.stale_after = lease;
        Ok(self)
    }

    /// Bound on validation plus dispatch before the receiver answers 202 anyway
    pub fn processing_timeout(&self) -> Duration {
        self.processing_timeout
    }

    /// Age after which a `processing` reservation may be reclaimed
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Execution mode
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Signing secret, if configured
    pub fn secret(&self) -> Option<&[u8]> {
        self.secret.as_deref()
    }

    /// Signature header name (lowercase)
    pub fn signature_header(&self) -> &str {
        &self.signature_header
    }

    /// Whether requests are accepted without signature verification.
    ///
    /// Never true in production: the constructors reject that combination.
    pub fn allows_bypass(&self) -> bool {
        !self.mode.is_production() && (self.skip_verification || self.secret.is_none())
    }

    fn validated(self) -> ConfigResult<Self> {
        if self.mode.is_production() {
            if self.skip_verification {
                return Err(ConfigError::BypassInProduction);
            }
            if self.secret.is_none() {
                return Err(ConfigError::MissingSecret);
            }
        }
        Ok(self)
    }
}

/// Read a positive millisecond duration from `name`, if set
fn env_millis(name: &str) -> ConfigResult<Option<Duration>> {
    let Ok(raw) = env::var(name) else {
        return Ok(None);
    };
    let millis = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidTimeout(format!("{name}={raw}: {e}")))?;
    if millis == 0 {
        return Err(ConfigError::InvalidTimeout(format!("{name} cannot be 0")));
    }
    Ok(Some(Duration::from_millis(millis)))
}
