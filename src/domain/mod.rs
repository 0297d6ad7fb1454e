//! Domain Collaborators
//!
//! The webhook pipeline never owns order, subscription or email logic. It
//! reaches them through the traits here, keyed by the processor's transaction
//! reference or subscription code so every call can be repeated safely.
//!
//! In-memory implementations live in [`memory`].

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use memory::{InMemoryDomain, InMemoryOrders, InMemorySubscriptions, OutboxNotifier};

// =============================================================================
// Orders
// =============================================================================

/// Order payment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Charge captured, nothing refunded
    Paid,
    /// Some of the amount refunded
    PartiallyRefunded,
    /// Fully refunded
    Refunded,
}

/// A storefront order created from a successful charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Storefront order id
    pub id: Uuid,
    /// Processor transaction reference; unique
    pub reference: String,
    /// Amount in minor units
    pub amount: i64,
    /// ISO currency code
    pub currency: String,
    /// Buyer email
    pub customer_email: String,
    /// Total refunded so far, minor units
    pub refunded_amount: i64,
    /// Processor refund ids already applied
    #[serde(default)]
    pub refund_ids: Vec<String>,
    /// Payment state
    pub status: OrderStatus,
    /// Checkout metadata from the charge
    pub metadata: Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Amount still refundable
    pub fn refundable(&self) -> i64 {
        (self.amount - self.refunded_amount).max(0)
    }

    /// Whether the processor refund `refund_id` was already applied
    pub fn has_refund(&self, refund_id: &str) -> bool {
        self.refund_ids.iter().any(|id| id == refund_id)
    }
}

/// Result of [`OrderService::record_refund`]
#[derive(Debug, Clone, PartialEq)]
pub enum RefundApplied {
    /// The refund was added to the order
    Recorded(Order),
    /// The refund id was applied before; the order is unchanged
    AlreadyApplied(Order),
}

impl RefundApplied {
    /// The order after the call
    pub fn order(&self) -> &Order {
        match self {
            Self::Recorded(order) | Self::AlreadyApplied(order) => order,
        }
    }
}

/// Input for [`OrderService::create_order`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    /// Processor transaction reference
    pub reference: String,
    /// Amount in minor units
    pub amount: i64,
    /// ISO currency code
    pub currency: String,
    /// Buyer email
    pub customer_email: String,
    /// Checkout metadata
    pub metadata: Value,
}

/// Order storage keyed by transaction reference
#[async_trait]
pub trait OrderService: Send + Sync + 'static {
    /// Look up an order by transaction reference
    async fn find_by_reference(&self, reference: &str) -> anyhow::Result<Option<Order>>;

    /// Create an order; returns the existing one if the reference is taken
    async fn create_order(&self, order: NewOrder) -> anyhow::Result<Order>;

    /// Add a refund to an existing order, capped at the refundable amount.
    ///
    /// A `refund_id` already applied to the order is a no-op reported as
    /// [`RefundApplied::AlreadyApplied`].
    async fn record_refund(
        &self,
        reference: &str,
        refund_id: Option<&str>,
        amount: i64,
    ) -> anyhow::Result<RefundApplied>;
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Renewing normally
    Active,
    /// Runs to the end of the period, then stops
    NonRenewing,
    /// A renewal charge failed
    Attention,
    /// Disabled
    Cancelled,
}

impl SubscriptionStatus {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::NonRenewing => "non-renewing",
            Self::Attention => "attention",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A customer subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Processor subscription code; unique
    pub code: String,
    /// Subscriber email
    pub customer_email: String,
    /// Plan code
    pub plan_code: Option<String>,
    /// Recurring amount in minor units
    pub amount: Option<i64>,
    /// Current state
    pub status: SubscriptionStatus,
    /// Next charge date (ISO 8601)
    pub next_payment_date: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// Input for [`SubscriptionService::create`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscription {
    /// Processor subscription code
    pub code: String,
    /// Subscriber email
    pub customer_email: String,
    /// Plan code
    pub plan_code: Option<String>,
    /// Recurring amount in minor units
    pub amount: Option<i64>,
    /// Next charge date (ISO 8601)
    pub next_payment_date: Option<String>,
}

/// Subscription storage keyed by subscription code
#[async_trait]
pub trait SubscriptionService: Send + Sync + 'static {
    /// Look up a subscription by code
    async fn find(&self, code: &str) -> anyhow::Result<Option<Subscription>>;

    /// Create a subscription; returns the existing one if the code is taken
    async fn create(&self, subscription: NewSubscription) -> anyhow::Result<Subscription>;

    /// Set the status of an existing subscription
    async fn update_status(
        &self,
        code: &str,
        status: SubscriptionStatus,
    ) -> anyhow::Result<Subscription>;
}

// =============================================================================
// Notifications
// =============================================================================

/// Customer-facing message produced by a handler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Notification {
    OrderConfirmation {
        email: String,
        reference: String,
        amount: i64,
        currency: String,
    },
    RefundProcessed {
        email: String,
        reference: String,
        amount: i64,
        currency: String,
    },
    SubscriptionCancelled {
        email: String,
        subscription_code: String,
    },
    PaymentFailed {
        email: String,
        subscription_code: String,
        amount: Option<i64>,
    },
}

impl Notification {
    /// Recipient address
    pub fn recipient(&self) -> &str {
        match self {
            Self::OrderConfirmation { email, .. }
            | Self::RefundProcessed { email, .. }
            | Self::SubscriptionCancelled { email, .. }
            | Self::PaymentFailed { email, .. } => email,
        }
    }

    /// Template name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderConfirmation { .. } => "order_confirmation",
            Self::RefundProcessed { .. } => "refund_processed",
            Self::SubscriptionCancelled { .. } => "subscription_cancelled",
            Self::PaymentFailed { .. } => "payment_failed",
        }
    }
}

/// Outbound customer messaging. Failures are tolerated by callers.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Deliver one message
    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// The set of collaborators handlers may call
#[derive(Clone)]
pub struct Collaborators {
    /// Order store
    pub orders: Arc<dyn OrderService>,
    /// Subscription store
    pub subscriptions: Arc<dyn SubscriptionService>,
    /// Customer messaging
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Bundle collaborators
    pub fn new(
        orders: Arc<dyn OrderService>,
        subscriptions: Arc<dyn SubscriptionService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orders,
            subscriptions,
            notifier,
        }
    }

    /// Collaborators backed by fresh in-memory stores
    pub fn in_memory() -> Self {
        InMemoryDomain::new().collaborators()
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_refundable_never_negative() {
        let order = Order {
            id: Uuid::new_v4(),
            reference: "ref_A".into(),
            amount: 1000,
            currency: "ZAR".into(),
            customer_email: "a@b.com".into(),
            refunded_amount: 1500,
            refund_ids: vec!["77".into()],
            status: OrderStatus::Refunded,
            metadata: Value::Null,
            created_at: Utc::now(),
        };
        assert_eq!(order.refundable(), 0);
        assert!(order.has_refund("77"));
        assert!(!order.has_refund("78"));
    }

    #[test]
    fn test_notification_serialization() {
        let notification = Notification::SubscriptionCancelled {
            email: "a@b.com".into(),
            subscription_code: "SUB_1".into(),
        };
        assert_eq!(notification.recipient(), "a@b.com");
        assert_eq!(
            serde_json::to_value(&notification).unwrap(),
            json!({"kind": "subscription_cancelled", "email": "a@b.com", "subscription_code": "SUB_1"})
        );
        assert_eq!(notification.kind(), "subscription_cancelled");
    }
}
