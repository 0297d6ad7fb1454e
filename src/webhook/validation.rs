//! Payload Validation
//!
//! Matches a parsed body against the schema of its declared event type.
//! Validation never rejects: a body that does not fit degrades to
//! [`PaymentEvent::Generic`] and the mismatch is reported in
//! [`ValidationReport::issues`].

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::webhook::events::{
    ChargeData, EventKind, GenericEvent, GenericReason, InvoiceData, PaymentEvent, RefundData,
    SubscriptionData,
};

/// Outcome of validating one payload
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// The typed (or generic) event
    pub event: PaymentEvent,
    /// Diagnostics collected while validating
    pub issues: Vec<String>,
}

impl ValidationReport {
    /// Whether the payload matched its schema without issues
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn generic(event: String, data: Value, reason: GenericReason, issues: Vec<String>) -> Self {
        Self {
            event: PaymentEvent::Generic(GenericEvent {
                event,
                data,
                reason,
            }),
            issues,
        }
    }
}

/// Validate a parsed payload
pub fn validate(payload: &Value) -> ValidationReport {
    let data = payload.get("data").cloned().unwrap_or(Value::Null);

    let event_name = match payload.get("event").and_then(Value::as_str).map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return ValidationReport::generic(
                "unknown".to_string(),
                data,
                GenericReason::MissingEventType,
                vec!["payload has no `event` field".to_string()],
            )
        }
    };

    let typed = match EventKind::from_name(&event_name) {
        EventKind::ChargeSuccess => {
            decode::<ChargeData>(&data)
                .and_then(check_charge)
                .map(PaymentEvent::ChargeSuccess)
        }
        EventKind::RefundProcessed => decode::<RefundData>(&data)
            .and_then(check_refund)
            .map(PaymentEvent::RefundProcessed),
        EventKind::SubscriptionCreate => decode::<SubscriptionData>(&data)
            .and_then(check_subscription)
            .map(PaymentEvent::SubscriptionCreated),
        EventKind::SubscriptionDisable => decode::<SubscriptionData>(&data)
            .and_then(check_subscription)
            .map(PaymentEvent::SubscriptionDisabled),
        EventKind::SubscriptionNotRenew => decode::<SubscriptionData>(&data)
            .and_then(check_subscription)
            .map(PaymentEvent::SubscriptionNotRenewing),
        EventKind::InvoicePaymentFailed => decode::<InvoiceData>(&data)
            .and_then(check_invoice)
            .map(PaymentEvent::InvoicePaymentFailed),
        EventKind::Unknown => {
            return ValidationReport::generic(
                event_name,
                data,
                GenericReason::UnknownType,
                Vec::new(),
            )
        }
    };

    match typed {
        Ok(event) => ValidationReport {
            event,
            issues: Vec::new(),
        },
        Err(detail) => {
            let issue = format!("{event_name}: {detail}");
            ValidationReport::generic(
                event_name,
                data,
                GenericReason::SchemaMismatch(detail),
                vec![issue],
            )
        }
    }
}

fn decode<T: DeserializeOwned>(data: &Value) -> Result<T, String> {
    serde_json::from_value(data.clone()).map_err(|e| e.to_string())
}

fn require_non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("`{field}` must not be empty"))
    } else {
        Ok(())
    }
}

fn check_charge(charge: ChargeData) -> Result<ChargeData, String> {
    require_non_empty("reference", &charge.reference)?;
    require_non_empty("currency", &charge.currency)?;
    if charge.amount <= 0 {
        return Err(format!("`amount` must be positive, got {}", charge.amount));
    }
    Ok(charge)
}

fn check_refund(refund: RefundData) -> Result<RefundData, String> {
    require_non_empty("transaction_reference", &refund.transaction_reference)?;
    if let Some(amount) = refund.amount.filter(|a| *a <= 0) {
        return Err(format!("`amount` must be positive, got {amount}"));
    }
    Ok(refund)
}

fn check_subscription(subscription: SubscriptionData) -> Result<SubscriptionData, String> {
    require_non_empty("subscription_code", &subscription.subscription_code)?;
    Ok(subscription)
}

fn check_invoice(invoice: InvoiceData) -> Result<InvoiceData, String> {
    require_non_empty(
        "subscription.subscription_code",
        &invoice.subscription.subscription_code,
    )?;
    Ok(invoice)
}
