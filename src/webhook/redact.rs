//! Secret and PII redaction for webhook logs
//!
//! Payloads are logged only after passing through [`redact_value`]:
//! secret-looking keys are replaced wholesale and email addresses keep a short
//! prefix plus their domain.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

/// The replacement string used for redacted values
pub const REDACTED: &str = "[REDACTED]";

/// Characters of an email's local part kept visible
const EMAIL_PREFIX_LEN: usize = 2;

fn secret_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^(authorization_code|signature|pin|cvv|otp|password|passcode|(.*_)?secret(_key)?|(.*_)?token|api_?key)$",
        )
        .expect("Invalid secret key pattern")
    })
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").expect("Invalid email pattern")
    })
}

/// Whether a JSON key names a secret
pub fn is_secret_key(key: &str) -> bool {
    secret_key_pattern().is_match(key)
}

/// Truncate an email to a short prefix plus its domain
///
/// `alice@example.com` becomes `al***@example.com`.
pub fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let prefix: String = local.chars().take(EMAIL_PREFIX_LEN).collect();
            format!("{prefix}***@{domain}")
        }
        _ => REDACTED.to_string(),
    }
}

/// Redact every email address embedded in free text
pub fn redact_text(input: &str) -> Cow<'_, str> {
    email_pattern().replace_all(input, |caps: &regex::Captures| redact_email(&caps[0]))
}

/// Redact a JSON value recursively
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::with_capacity(map.len());
            for (key, inner) in map {
                let replacement = if is_secret_key(key) && !inner.is_null() {
                    Value::String(REDACTED.to_string())
                } else {
                    redact_value(inner)
                };
                redacted.insert(key.clone(), replacement);
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::String(s) => Value::String(redact_text(s).into_owned()),
        other => other.clone(),
    }
}

/// First characters of a signature header, for correlation only
pub fn partial_signature(signature: Option<&str>) -> String {
    match signature.map(str::trim).filter(|s| !s.is_empty()) {
        Some(sig) => {
            let prefix: String = sig.chars().take(8).collect();
            format!("{prefix}...")
        }
        None => "none".to_string(),
    }
}
