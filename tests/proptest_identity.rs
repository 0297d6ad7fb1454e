//! Property-based testing for event identity, redaction, and signatures.
//!
//! Uses proptest to generate arbitrary payloads and verify the invariants
//! the pipeline's exactly-once guarantee rests on.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

use storefront_webhooks::webhook::identity::{resolve_id, IdSource};
use storefront_webhooks::webhook::ledger::{
    Completion, IdempotencyLedger, InMemoryLedger, ProcessingStatus, Reservation,
};
use storefront_webhooks::webhook::redact::{redact_value, REDACTED};
use storefront_webhooks::webhook::signature::{sign, verify};
use storefront_webhooks::webhook::EventId;

// ============================================================================
// STRATEGIES
// ============================================================================

/// Strategy for sender-assigned event ids
pub fn arb_sender_id() -> impl Strategy<Value = String> {
    "evt_[a-zA-Z0-9]{1,24}"
}

/// Strategy for transaction references
pub fn arb_reference() -> impl Strategy<Value = String> {
    "ref_[a-zA-Z0-9_-]{1,24}"
}

/// Strategy for event type names, known and unknown
pub fn arb_event_type() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("charge.success".to_string()),
        Just("refund.processed".to_string()),
        Just("subscription.create".to_string()),
        Just("subscription.disable".to_string()),
        Just("invoice.payment_failed".to_string()),
        "[a-z]{3,10}\\.[a-z_]{3,12}",
    ]
}

/// Strategy for receipt timestamps
pub fn arb_received_at() -> impl Strategy<Value = DateTime<Utc>> {
    (1_600_000_000i64..1_900_000_000).prop_map(|secs| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or_else(Utc::now)
    })
}

/// Strategy for flat `data` objects with scalar values
pub fn arb_data_fields() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::vec(
        (
            "[a-z]{2,10}",
            prop_oneof![
                any::<i64>().prop_map(Value::from),
                "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
                any::<bool>().prop_map(Value::from),
            ],
        ),
        0..8,
    )
}

/// Strategy for secret-bearing keys
pub fn arb_secret_key() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("authorization_code".to_string()),
        Just("signature".to_string()),
        Just("cvv".to_string()),
        Just("api_key".to_string()),
        "[a-z]{2,8}_secret".prop_map(|s| s),
        "[a-z]{2,8}_token".prop_map(|s| s),
    ]
}

// ============================================================================
// IDENTITY PROPERTIES
// ============================================================================

mod identity_props {
    use super::*;

    proptest! {
        /// Test: sender ids ignore receipt time and the rest of the payload
        #[test]
        fn sender_id_is_stable(
            id in arb_sender_id(),
            event_type in arb_event_type(),
            fields in arb_data_fields(),
            first in arb_received_at(),
            second in arb_received_at(),
        ) {
            let data: Map<String, Value> = fields.into_iter().collect();
            let payload = json!({"id": id, "event": event_type, "data": data});

            let a = resolve_id(&payload, first);
            let b = resolve_id(&payload, second);

            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.source(), IdSource::Sender);
            prop_assert_eq!(a.as_str(), format!("evt:{id}"));
        }

        /// Test: whitespace in the raw body never changes the id
        #[test]
        fn sender_id_survives_reformatting(
            id in arb_sender_id(),
            reference in arb_reference(),
            received_at in arb_received_at(),
        ) {
            let compact = json!({"id": id, "event": "charge.success", "data": {"reference": reference}})
                .to_string();
            let pretty = serde_json::to_string_pretty(
                &serde_json::from_str::<Value>(&compact).unwrap(),
            )
            .unwrap();

            let a = resolve_id(&serde_json::from_str(&compact).unwrap(), received_at);
            let b = resolve_id(&serde_json::from_str(&pretty).unwrap(), received_at);
            prop_assert_eq!(a, b);
        }

        /// Test: reference ids are scoped by event type
        #[test]
        fn reference_id_includes_event_type(
            reference in arb_reference(),
            left in arb_event_type(),
            right in arb_event_type(),
            received_at in arb_received_at(),
        ) {
            let a = resolve_id(&json!({"event": left, "data": {"reference": reference}}), received_at);
            let b = resolve_id(&json!({"event": right, "data": {"reference": reference}}), received_at);

            prop_assert_eq!(a.source(), IdSource::Reference);
            prop_assert_eq!(a == b, left == right);
        }

        /// Test: content hashes ignore key insertion order
        #[test]
        fn content_hash_is_order_independent(
            fields in arb_data_fields(),
            received_at in arb_received_at(),
        ) {
            let forward: Map<String, Value> = fields.iter().cloned().collect();
            let backward: Map<String, Value> = fields.iter().rev().cloned().collect();
            // Duplicate keys resolve differently by order; compare only unique sets
            prop_assume!(forward == backward);

            let a = resolve_id(&json!({"data": forward}), received_at);
            let b = resolve_id(&json!({"data": backward}), received_at);

            prop_assert_eq!(a.source(), IdSource::ContentHash);
            prop_assert_eq!(a, b);
        }

        /// Test: every resolved id parses back
        #[test]
        fn resolved_ids_are_well_formed(
            fields in arb_data_fields(),
            received_at in arb_received_at(),
        ) {
            let data: Map<String, Value> = fields.into_iter().collect();
            let id = resolve_id(&json!({"data": data}), received_at);
            prop_assert!(EventId::parse(id.as_str()).is_some());
        }
    }
}

// ============================================================================
// REDACTION PROPERTIES
// ============================================================================

mod redaction_props {
    use super::*;

    proptest! {
        /// Test: secret values never survive redaction, at any depth
        #[test]
        fn secret_values_never_leak(
            key in arb_secret_key(),
            secret in "sk_[a-zA-Z0-9]{16,32}",
            depth in 0usize..4,
        ) {
            let mut leaf = Map::new();
            leaf.insert(key, Value::String(secret.clone()));
            let mut value = Value::Object(leaf);
            for _ in 0..depth {
                let item = value.clone();
                value = json!({"data": value, "items": [item]});
            }

            let rendered = redact_value(&value).to_string();
            prop_assert!(!rendered.contains(&secret));
            prop_assert!(rendered.contains(REDACTED));
        }

        /// Test: full email addresses never survive redaction
        #[test]
        fn emails_are_truncated(
            local in "[a-z]{3,12}",
            domain in "[a-z]{3,10}\\.(com|co\\.za|io)",
            prefix in "[a-zA-Z ]{0,10}",
        ) {
            let email = format!("{local}@{domain}");
            let value = json!({
                "customer": {"email": email},
                "note": format!("{prefix}{email}"),
            });

            let rendered = redact_value(&value).to_string();
            prop_assert!(!rendered.contains(&email));
            prop_assert!(rendered.contains(&domain));
        }
    }
}

// ============================================================================
// SIGNATURE PROPERTIES
// ============================================================================

mod signature_props {
    use super::*;

    proptest! {
        /// Test: a body signed with the secret verifies
        #[test]
        fn signed_body_verifies(
            secret in "[a-zA-Z0-9_]{8,40}",
            body in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let signature = sign(secret.as_bytes(), &body);
            prop_assert!(verify(&body, Some(&signature), Some(secret.as_bytes())));
        }

        /// Test: flipping any bit of the body breaks the signature
        #[test]
        fn mutated_body_is_rejected(
            secret in "[a-zA-Z0-9_]{8,40}",
            body in prop::collection::vec(any::<u8>(), 1..512),
            index in any::<prop::sample::Index>(),
            mask in 1u8..=255,
        ) {
            let signature = sign(secret.as_bytes(), &body);
            let mut tampered = body.clone();
            let at = index.index(tampered.len());
            tampered[at] ^= mask;

            prop_assert!(!verify(&tampered, Some(&signature), Some(secret.as_bytes())));
        }

        /// Test: a different secret never verifies
        #[test]
        fn wrong_secret_is_rejected(
            secret in "[a-z]{8,20}",
            other in "[A-Z]{8,20}",
            body in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let signature = sign(other.as_bytes(), &body);
            prop_assert!(!verify(&body, Some(&signature), Some(secret.as_bytes())));
        }
    }
}

// ============================================================================
// LEDGER PROPERTIES
// ============================================================================

mod ledger_props {
    use super::*;

    /// Strategy for a terminal completion
    fn arb_completion() -> impl Strategy<Value = Completion> {
        prop_oneof![
            Just(ProcessingStatus::Processed),
            Just(ProcessingStatus::Failed),
            Just(ProcessingStatus::Skipped),
        ]
        .prop_map(|status| Completion {
            status,
            error_message: (status == ProcessingStatus::Failed).then(|| "boom".to_string()),
            outcome: None,
        })
    }

    proptest! {
        /// Test: only the first reservation of an id is acquired
        #[test]
        fn reserve_acquires_once(ids in prop::collection::vec(arb_sender_id(), 1..20)) {
            let ledger = InMemoryLedger::new();
            let mut acquired = std::collections::HashSet::new();

            for raw in &ids {
                let id = EventId::parse(&format!("evt:{raw}")).unwrap();
                let reservation = tokio_test::block_on(ledger.reserve(&id, "charge.success", "{}"))
                    .unwrap();
                let first = acquired.insert(raw.clone());
                prop_assert_eq!(matches!(reservation, Reservation::Acquired), first);
            }

            prop_assert_eq!(ledger.len(), acquired.len());
        }

        /// Test: the first terminal status is never overwritten
        #[test]
        fn terminal_status_is_final(completions in prop::collection::vec(arb_completion(), 1..6)) {
            let ledger = InMemoryLedger::new();
            let id = EventId::parse("evt:evt_final").unwrap();
            tokio_test::block_on(ledger.reserve(&id, "charge.success", "{}")).unwrap();

            let first = completions[0].status;
            for completion in completions {
                tokio_test::block_on(ledger.record(&id, "charge.success", "{}", completion))
                    .unwrap();
            }

            let record = tokio_test::block_on(ledger.get(&id)).unwrap().unwrap();
            prop_assert_eq!(record.processing_status, first);
        }
    }
}
