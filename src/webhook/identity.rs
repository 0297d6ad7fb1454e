//! Event Identity Resolution
//!
//! Derives the ledger key for an inbound event. Strategies are tried in order
//! and each result carries a source tag, so ids produced by different
//! strategies can never collide:
//!
//! ```text
//! evt:<sender id>                    sender supplied a top-level id
//! ref:<event type>:<reference>       event type plus a transaction/subscription reference
//! hash:<sha256>                      canonical payload + receipt time (last resort)
//! ```
//!
//! The last strategy always yields an id but cannot deduplicate a genuine
//! retry, because the receipt time differs per delivery. Its canonical form is
//! compact JSON with object keys sorted at every depth, written independently
//! of how `serde_json` orders maps.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fields inside `data` that identify the underlying transaction, in priority order
const REFERENCE_PATHS: &[&[&str]] = &[
    &["reference"],
    &["transaction_reference"],
    &["transaction", "reference"],
    &["subscription_code"],
    &["subscription", "subscription_code"],
    &["invoice_code"],
];

/// Which strategy produced an [`EventId`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdSource {
    /// The sender's own event id
    Sender,
    /// Event type combined with a transaction reference
    Reference,
    /// Content hash plus receipt time
    ContentHash,
}

impl IdSource {
    /// Prefix used in the id string
    pub fn tag(self) -> &'static str {
        match self {
            Self::Sender => "evt",
            Self::Reference => "ref",
            Self::ContentHash => "hash",
        }
    }

    /// Whether redeliveries of the same event map to the same id
    pub fn deduplicates_retries(self) -> bool {
        !matches!(self, Self::ContentHash)
    }
}

/// Ledger key for an inbound event
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    fn tagged(source: IdSource, value: &str) -> Self {
        Self(format!("{}:{}", source.tag(), value))
    }

    /// Parse a previously issued id (e.g. from an operator replay request)
    pub fn parse(raw: &str) -> Option<Self> {
        let (tag, rest) = raw.split_once(':')?;
        if rest.is_empty() {
            return None;
        }
        match tag {
            "evt" | "ref" | "hash" => Some(Self(raw.to_string())),
            _ => None,
        }
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strategy that produced this id
    pub fn source(&self) -> IdSource {
        if self.0.starts_with("evt:") {
            IdSource::Sender
        } else if self.0.starts_with("ref:") {
            IdSource::Reference
        } else {
            IdSource::ContentHash
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the ledger id for a parsed payload
pub fn resolve_id(payload: &Value, received_at: DateTime<Utc>) -> EventId {
    if let Some(id) = payload.get("id").and_then(scalar_string) {
        return EventId::tagged(IdSource::Sender, &id);
    }

    let event_type = payload
        .get("event")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let (Some(event_type), Some(reference)) =
        (event_type, payload.get("data").and_then(find_reference))
    {
        return EventId::tagged(IdSource::Reference, &format!("{event_type}:{reference}"));
    }

    EventId::tagged(IdSource::ContentHash, &content_hash(payload, received_at))
}

fn find_reference(data: &Value) -> Option<String> {
    REFERENCE_PATHS.iter().find_map(|path| {
        path.iter()
            .try_fold(data, |node, key| node.get(*key))
            .and_then(scalar_string)
    })
}

/// Non-empty string, or integer rendered as a string
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn content_hash(payload: &Value, received_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    write_canonical(payload, &mut hasher);
    hasher.update(b"|");
    hasher.update(received_at.timestamp_millis().to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Feed compact JSON with sorted object keys into the hasher
fn write_canonical(value: &Value, hasher: &mut Sha256) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            hasher.update(b"{");
            for (i, (key, inner)) in entries.into_iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hasher.update(Value::from(key.as_str()).to_string().as_bytes());
                hasher.update(b":");
                write_canonical(inner, hasher);
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                write_canonical(item, hasher);
            }
            hasher.update(b"]");
        }
        leaf => hasher.update(leaf.to_string().as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn test_sender_id_wins() {
        let payload = json!({
            "id": "evt_1",
            "event": "charge.success",
            "data": {"reference": "ref_A"}
        });
        let id = resolve_id(&payload, at(1));
        assert_eq!(id.as_str(), "evt:evt_1");
        assert_eq!(id.source(), IdSource::Sender);
    }

    #[test]
    fn test_numeric_sender_id() {
        let id = resolve_id(&json!({"id": 4099260516_u64, "event": "x"}), at(1));
        assert_eq!(id.as_str(), "evt:4099260516");
    }

    #[test]
    fn test_reference_fallback() {
        let payload = json!({
            "event": "refund.processed",
            "data": {"transaction_reference": "ref_Z"}
        });
        let id = resolve_id(&payload, at(1));
        assert_eq!(id.as_str(), "ref:refund.processed:ref_Z");
        assert_eq!(id.source(), IdSource::Reference);
    }

    #[test]
    fn test_reference_priority_and_nesting() {
        let payload = json!({
            "event": "invoice.payment_failed",
            "data": {"subscription": {"subscription_code": "SUB_1"}, "invoice_code": "INV_1"}
        });
        assert_eq!(
            resolve_id(&payload, at(1)).as_str(),
            "ref:invoice.payment_failed:SUB_1"
        );
    }

    #[test]
    fn test_same_reference_different_event_types_do_not_collide() {
        let charge = json!({"event": "charge.success", "data": {"reference": "r"}});
        let refund = json!({"event": "refund.processed", "data": {"reference": "r"}});
        assert_ne!(resolve_id(&charge, at(1)), resolve_id(&refund, at(1)));
    }

    #[test]
    fn test_content_hash_fallback() {
        let payload = json!({"event": "charge.success", "data": {"amount": 100}});
        let first = resolve_id(&payload, at(100));
        assert_eq!(first.source(), IdSource::ContentHash);
        assert!(!first.source().deduplicates_retries());
        assert_eq!(first, resolve_id(&payload, at(100)));
        // The known gap: a different receipt time yields a different id.
        assert_ne!(first, resolve_id(&payload, at(101)));
    }

    #[test]
    fn test_content_hash_ignores_key_order() {
        let mut inner = serde_json::Map::new();
        inner.insert("e".into(), json!(3));
        inner.insert("d".into(), json!(2));
        let mut reversed = serde_json::Map::new();
        reversed.insert("b".into(), json!({"c": [1, Value::Object(inner)]}));
        reversed.insert("a".into(), json!("x\"y"));
        let reversed = Value::Object(reversed);
        let parsed: Value =
            serde_json::from_str(r#"{ "b": {"c": [1, {"e": 3, "d": 2}]},  "a": "x\"y" }"#)
                .unwrap();

        let expected = hex::encode(Sha256::digest(
            br#"{"a":"x\"y","b":{"c":[1,{"d":2,"e":3}]}}|1000"#,
        ));
        assert_eq!(content_hash(&reversed, at(1)), expected);
        assert_eq!(content_hash(&parsed, at(1)), expected);
    }

    #[test]
    fn test_blank_fields_are_ignored() {
        let payload = json!({"id": "  ", "event": "", "data": {"reference": "ref"}});
        assert_eq!(resolve_id(&payload, at(1)).source(), IdSource::ContentHash);
    }

    #[test]
    fn test_whitespace_does_not_change_sender_id() {
        let compact: Value = serde_json::from_str(r#"{"id":"evt_9","event":"x"}"#).unwrap();
        let spaced: Value =
            serde_json::from_str("{\n  \"event\" : \"x\",\n  \"id\" : \"evt_9\"\n}").unwrap();
        assert_eq!(resolve_id(&compact, at(1)), resolve_id(&spaced, at(2)));
    }

    #[test]
    fn test_parse_round_trip() {
        assert_eq!(EventId::parse("evt:evt_1").unwrap().as_str(), "evt:evt_1");
        assert_eq!(
            EventId::parse("ref:charge.success:r").unwrap().source(),
            IdSource::Reference
        );
        assert!(EventId::parse("evt:").is_none());
        assert!(EventId::parse("other:1").is_none());
        assert!(EventId::parse("plain").is_none());
    }
}
