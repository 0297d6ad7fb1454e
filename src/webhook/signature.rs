//! Webhook Signature Verification
//!
//! HMAC-SHA512 over the exact raw request bytes, hex encoded in the signature
//! header. The body must never be re-serialised before verification: a
//! different byte layout produces a different MAC.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::webhook::config::WebhookConfig;

type HmacSha512 = Hmac<Sha512>;

/// Verify a signature header against the raw body.
///
/// Fails closed: a missing header, a missing or empty secret, undecodable hex
/// or a mismatch all return `false`.
pub fn verify(raw_body: &[u8], signature_header: Option<&str>, secret: Option<&[u8]>) -> bool {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return false;
    };
    let Some(header) = signature_header.map(str::trim).filter(|h| !h.is_empty()) else {
        return false;
    };

    let provided = match hex::decode(header) {
        Ok(bytes) => bytes,
        Err(_) => {
            debug!("Failed to decode webhook signature as hex");
            return false;
        }
    };

    match compute_mac(secret, raw_body) {
        Some(expected) => constant_time_compare(&expected, &provided),
        None => false,
    }
}

/// Compute the hex signature the payment processor would send for `body`
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    compute_mac(secret, body)
        .map(hex::encode)
        .unwrap_or_default()
}

fn compute_mac(secret: &[u8], body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha512::new_from_slice(secret).ok()?;
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Result of checking one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Signature matches the body
    Valid,
    /// Signature present but wrong
    Invalid,
    /// Header absent or empty
    Missing,
    /// Verification skipped (non-production only)
    Bypassed,
}

impl SignatureCheck {
    /// Whether the request may proceed
    pub fn is_authentic(self) -> bool {
        matches!(self, Self::Valid | Self::Bypassed)
    }

    /// Get the string representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Missing => "missing",
            Self::Bypassed => "bypassed",
        }
    }
}

/// Request verifier built from a validated [`WebhookConfig`]
///
/// There is no public way to construct a bypassing verifier other than from a
/// configuration that allows it, and production configurations never do.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<Vec<u8>>,
    bypass: bool,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("bypass", &self.bypass)
            .finish()
    }
}

impl SignatureVerifier {
    /// Build the verifier for a configuration
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            secret: config.secret().map(<[u8]>::to_vec),
            bypass: config.allows_bypass(),
        }
    }

    /// Check a request body against its signature header
    pub fn check(&self, raw_body: &[u8], signature_header: Option<&str>) -> SignatureCheck {
        if self.bypass {
            return SignatureCheck::Bypassed;
        }

        match signature_header.map(str::trim) {
            None | Some("") => SignatureCheck::Missing,
            Some(header) => {
                if verify(raw_body, Some(header), self.secret.as_deref()) {
                    SignatureCheck::Valid
                } else {
                    SignatureCheck::Invalid
                }
            }
        }
    }

    /// Whether this verifier skips verification
    pub fn is_bypassing(&self) -> bool {
        self.bypass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::config::ExecutionMode;

    const SECRET: &[u8] = b"sk_test_secret";
    const BODY: &[u8] = br#"{"event":"charge.success","data":{"reference":"ref_A"}}"#;

    #[test]
    fn test_valid_signature() {
        let signature = sign(SECRET, BODY);
        assert_eq!(signature.len(), 128);
        assert!(verify(BODY, Some(&signature), Some(SECRET)));
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let signature = sign(SECRET, BODY).to_uppercase();
        assert!(verify(BODY, Some(&signature), Some(SECRET)));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let signature = sign(SECRET, BODY);
        let mut tampered = BODY.to_vec();
        tampered[10] ^= 0x01;
        assert!(!verify(&tampered, Some(&signature), Some(SECRET)));
    }

    #[test]
    fn test_reserialised_body_rejected() {
        let signature = sign(SECRET, BODY);
        let value: serde_json::Value = serde_json::from_slice(BODY).unwrap();
        let pretty = serde_json::to_vec_pretty(&value).unwrap();
        assert!(!verify(&pretty, Some(&signature), Some(SECRET)));
    }

    #[test]
    fn test_fails_closed() {
        let signature = sign(SECRET, BODY);
        assert!(!verify(BODY, None, Some(SECRET)));
        assert!(!verify(BODY, Some(""), Some(SECRET)));
        assert!(!verify(BODY, Some(&signature), None));
        assert!(!verify(BODY, Some(&signature), Some(b"")));
        assert!(!verify(BODY, Some("not-hex"), Some(SECRET)));
        assert!(!verify(BODY, Some(&signature), Some(b"other-secret")));
        assert!(!verify(BODY, Some(&signature[..64]), Some(SECRET)));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(&[1, 2, 3], &[1, 2, 3]));
        assert!(!constant_time_compare(&[1, 2, 3], &[1, 2, 4]));
        assert!(!constant_time_compare(&[1, 2], &[1, 2, 3]));
    }

    #[test]
    fn test_verifier_enforces_in_production() {
        let config = WebhookConfig::new(ExecutionMode::Production, Some("sk_live".into())).unwrap();
        let verifier = SignatureVerifier::from_config(&config);
        assert!(!verifier.is_bypassing());

        let good = sign(b"sk_live", BODY);
        assert_eq!(verifier.check(BODY, Some(&good)), SignatureCheck::Valid);
        assert_eq!(verifier.check(BODY, Some("00ff")), SignatureCheck::Invalid);
        assert_eq!(verifier.check(BODY, None), SignatureCheck::Missing);
        assert_eq!(verifier.check(BODY, Some("  ")), SignatureCheck::Missing);
    }

    #[test]
    fn test_verifier_bypass_in_development() {
        let config = WebhookConfig::new(ExecutionMode::Development, None).unwrap();
        let verifier = SignatureVerifier::from_config(&config);
        assert!(verifier.is_bypassing());
        assert_eq!(verifier.check(BODY, None), SignatureCheck::Bypassed);
        assert!(SignatureCheck::Bypassed.is_authentic());
    }

    #[test]
    fn test_debug_hides_secret() {
        let verifier = SignatureVerifier::from_config(&WebhookConfig::test_config());
        assert!(!format!("{verifier:?}").contains("test-webhook-secret"));
    }
}
