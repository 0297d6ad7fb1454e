//! Payment Event Types
//!
//! Strongly-typed representations of the payment processor's webhook events.
//! Every event that reaches the dispatcher is a [`PaymentEvent`]; events whose
//! type is unknown, or whose body does not match the known shape, become
//! [`PaymentEvent::Generic`] instead of being rejected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event types we handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    // Charge events
    #[serde(rename = "charge.success")]
    ChargeSuccess,

    // Refund events
    #[serde(rename = "refund.processed")]
    RefundProcessed,

    // Subscription events
    #[serde(rename = "subscription.create")]
    SubscriptionCreate,
    #[serde(rename = "subscription.disable")]
    SubscriptionDisable,
    #[serde(rename = "subscription.not_renew")]
    SubscriptionNotRenew,

    // Invoice events
    #[serde(rename = "invoice.payment_failed")]
    InvoicePaymentFailed,

    // Catch-all for events we don't explicitly handle
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Every handled kind
    pub const KNOWN: [EventKind; 6] = [
        Self::ChargeSuccess,
        Self::RefundProcessed,
        Self::SubscriptionCreate,
        Self::SubscriptionDisable,
        Self::SubscriptionNotRenew,
        Self::InvoicePaymentFailed,
    ];

    /// Map the sender's discriminator to a kind
    pub fn from_name(name: &str) -> Self {
        match name {
            "charge.success" => Self::ChargeSuccess,
            "refund.processed" => Self::RefundProcessed,
            "subscription.create" => Self::SubscriptionCreate,
            "subscription.disable" => Self::SubscriptionDisable,
            "subscription.not_renew" => Self::SubscriptionNotRenew,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            _ => Self::Unknown,
        }
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChargeSuccess => "charge.success",
            Self::RefundProcessed => "refund.processed",
            Self::SubscriptionCreate => "subscription.create",
            Self::SubscriptionDisable => "subscription.disable",
            Self::SubscriptionNotRenew => "subscription.not_renew",
            Self::InvoicePaymentFailed => "invoice.payment_failed",
            Self::Unknown => "unknown",
        }
    }

    /// Check if this is a known event type
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl FromStr for EventKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated event
#[derive(Debug, Clone)]
pub enum PaymentEvent {
    /// `charge.success`
    ChargeSuccess(ChargeData),
    /// `refund.processed`
    RefundProcessed(RefundData),
    /// `subscription.create`
    SubscriptionCreated(SubscriptionData),
    /// `subscription.disable`
    SubscriptionDisabled(SubscriptionData),
    /// `subscription.not_renew`
    SubscriptionNotRenewing(SubscriptionData),
    /// `invoice.payment_failed`
    InvoicePaymentFailed(InvoiceData),
    /// Anything else, carried opaquely
    Generic(GenericEvent),
}

impl PaymentEvent {
    /// Kind of this event (`Unknown` for generic events)
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ChargeSuccess(_) => EventKind::ChargeSuccess,
            Self::RefundProcessed(_) => EventKind::RefundProcessed,
            Self::SubscriptionCreated(_) => EventKind::SubscriptionCreate,
            Self::SubscriptionDisabled(_) => EventKind::SubscriptionDisable,
            Self::SubscriptionNotRenewing(_) => EventKind::SubscriptionNotRenew,
            Self::InvoicePaymentFailed(_) => EventKind::InvoicePaymentFailed,
            Self::Generic(_) => EventKind::Unknown,
        }
    }

    /// The sender's event discriminator
    pub fn event_type(&self) -> &str {
        match self {
            Self::Generic(generic) => &generic.event,
            other => other.kind().as_str(),
        }
    }

    /// Whether this is the generic fallback
    pub fn is_generic(&self) -> bool {
        matches!(self, Self::Generic(_))
    }
}

// =============================================================================
// Shared Types
// =============================================================================

/// Customer attached to an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Customer email
    pub email: String,
    /// Processor customer code (CUS_...)
    #[serde(default)]
    pub customer_code: Option<String>,
    /// First name
    #[serde(default)]
    pub first_name: Option<String>,
    /// Last name
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Reusable card authorization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    /// Token for recurring charges; never logged
    #[serde(default)]
    pub authorization_code: Option<String>,
    /// Last four card digits
    #[serde(default)]
    pub last4: Option<String>,
    /// Card brand
    #[serde(default)]
    pub card_type: Option<String>,
    /// Issuing bank
    #[serde(default)]
    pub bank: Option<String>,
    /// Whether the authorization can be charged again
    #[serde(default)]
    pub reusable: bool,
}

// =============================================================================
// Charge Types
// =============================================================================

/// `charge.success` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeData {
    /// Processor transaction id
    #[serde(default)]
    pub id: Option<i64>,
    /// Transaction reference; the order key
    pub reference: String,
    /// Amount in the currency's minor unit
    pub amount: i64,
    /// ISO currency code
    pub currency: String,
    /// Processor transaction status
    #[serde(default)]
    pub status: Option<String>,
    /// Payment channel (card, bank, ...)
    #[serde(default)]
    pub channel: Option<String>,
    /// Payment time (ISO 8601)
    #[serde(default)]
    pub paid_at: Option<String>,
    /// Paying customer
    pub customer: Customer,
    /// Card authorization
    #[serde(default)]
    pub authorization: Option<Authorization>,
    /// Checkout metadata (cart id, referral code, ...)
    #[serde(default)]
    pub metadata: Value,
}

// =============================================================================
// Refund Types
// =============================================================================

/// `refund.processed` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundData {
    /// Processor refund id
    #[serde(default)]
    pub id: Option<i64>,
    /// Reference of the refunded transaction
    pub transaction_reference: String,
    /// Refunded amount; a full refund when absent
    #[serde(default)]
    pub amount: Option<i64>,
    /// ISO currency code
    #[serde(default)]
    pub currency: Option<String>,
    /// Processor refund status
    #[serde(default)]
    pub status: Option<String>,
    /// Customer, when the processor includes it
    #[serde(default)]
    pub customer: Option<Customer>,
}

// =============================================================================
// Subscription Types
// =============================================================================

/// Subscription plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan code (PLN_...)
    pub plan_code: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Billing interval
    #[serde(default)]
    pub interval: Option<String>,
}

/// `subscription.*` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionData {
    /// Subscription code (SUB_...); the subscription key
    pub subscription_code: String,
    /// Processor subscription status
    #[serde(default)]
    pub status: Option<String>,
    /// Recurring amount in minor units
    #[serde(default)]
    pub amount: Option<i64>,
    /// Next charge date (ISO 8601)
    #[serde(default)]
    pub next_payment_date: Option<String>,
    /// Subscriber
    pub customer: Customer,
    /// Plan
    #[serde(default)]
    pub plan: Option<Plan>,
}

// =============================================================================
// Invoice Types
// =============================================================================

/// Subscription reference inside an invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRef {
    /// Subscription code
    pub subscription_code: String,
    /// Processor subscription status
    #[serde(default)]
    pub status: Option<String>,
}

/// `invoice.payment_failed` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceData {
    /// Invoice code
    #[serde(default)]
    pub invoice_code: Option<String>,
    /// Amount due in minor units
    #[serde(default)]
    pub amount: Option<i64>,
    /// Subscription the invoice belongs to
    pub subscription: SubscriptionRef,
    /// Customer
    #[serde(default)]
    pub customer: Option<Customer>,
    /// Free-text description
    #[serde(default)]
    pub description: Option<String>,
}

// =============================================================================
// Generic Fallback
// =============================================================================

/// Why an event fell back to the generic shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenericReason {
    /// Event type not in the known set
    UnknownType,
    /// No `event` field at all
    MissingEventType,
    /// Known type, but the body did not match its schema
    SchemaMismatch(String),
}

impl GenericReason {
    /// Reason recorded with the skipped ledger status
    pub fn describe(&self) -> String {
        match self {
            Self::UnknownType => "unknown event type".to_string(),
            Self::MissingEventType => "missing event type".to_string(),
            Self::SchemaMismatch(detail) => format!("schema mismatch: {detail}"),
        }
    }
}

/// Event carried as event name plus opaque data
#[derive(Debug, Clone)]
pub struct GenericEvent {
    /// Sender's event discriminator
    pub event: String,
    /// Opaque `data` object
    pub data: Value,
    /// Why no typed shape applied
    pub reason: GenericReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_parsing() {
        assert_eq!(
            EventKind::from_str("charge.success").unwrap(),
            EventKind::ChargeSuccess
        );
        assert_eq!(
            EventKind::from_name("subscription.not_renew"),
            EventKind::SubscriptionNotRenew
        );
        assert_eq!(EventKind::from_name("transfer.success"), EventKind::Unknown);
        assert!(!EventKind::Unknown.is_known());
    }

    #[test]
    fn test_known_kinds_round_trip_through_names() {
        for kind in EventKind::KNOWN {
            assert!(kind.is_known());
            assert_eq!(EventKind::from_name(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_parse_charge_data() {
        let data = json!({
            "id": 302961,
            "reference": "ref_A",
            "amount": 10000,
            "currency": "ZAR",
            "status": "success",
            "customer": {"email": "a@b.com", "customer_code": "CUS_1"},
            "authorization": {"authorization_code": "AUTH_x", "last4": "4081", "reusable": true}
        });
        let charge: ChargeData = serde_json::from_value(data).unwrap();
        assert_eq!(charge.reference, "ref_A");
        assert_eq!(charge.amount, 10000);
        assert_eq!(charge.customer.email, "a@b.com");
        assert!(charge.authorization.unwrap().reusable);
        assert!(charge.metadata.is_null());
    }

    #[test]
    fn test_parse_minimal_refund() {
        let refund: RefundData =
            serde_json::from_value(json!({"transaction_reference": "ref_Z"})).unwrap();
        assert_eq!(refund.transaction_reference, "ref_Z");
        assert!(refund.amount.is_none());
    }

    #[test]
    fn test_generic_event_type_passthrough() {
        let event = PaymentEvent::Generic(GenericEvent {
            event: "transfer.success".into(),
            data: json!({}),
            reason: GenericReason::UnknownType,
        });
        assert_eq!(event.event_type(), "transfer.success");
        assert_eq!(event.kind(), EventKind::Unknown);
        assert!(event.is_generic());
    }

    #[test]
    fn test_generic_reason_description() {
        assert_eq!(GenericReason::UnknownType.describe(), "unknown event type");
        assert_eq!(
            GenericReason::SchemaMismatch("missing field `reference`".into()).describe(),
            "schema mismatch: missing field `reference`"
        );
    }
}
