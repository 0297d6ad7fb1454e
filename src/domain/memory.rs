//! In-memory collaborators
//!
//! Used by the binary when no external stores are wired in, and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use super::{
    Collaborators, NewOrder, NewSubscription, Notification, Notifier, Order, OrderService,
    OrderStatus, RefundApplied, Subscription, SubscriptionService, SubscriptionStatus,
};
use crate::webhook::redact::redact_email;

/// Orders keyed by transaction reference
#[derive(Debug, Default)]
pub struct InMemoryOrders {
    orders: RwLock<HashMap<String, Order>>,
}

impl InMemoryOrders {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders
    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    /// Whether no orders exist
    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }

    /// Snapshot of one order
    pub fn get(&self, reference: &str) -> Option<Order> {
        self.orders.read().get(reference).cloned()
    }
}

#[async_trait]
impl OrderService for InMemoryOrders {
    async fn find_by_reference(&self, reference: &str) -> anyhow::Result<Option<Order>> {
        Ok(self.get(reference))
    }

    async fn create_order(&self, order: NewOrder) -> anyhow::Result<Order> {
        let mut orders = self.orders.write();
        let created = orders
            .entry(order.reference.clone())
            .or_insert_with(|| Order {
                id: Uuid::new_v4(),
                reference: order.reference,
                amount: order.amount,
                currency: order.currency,
                customer_email: order.customer_email,
                refunded_amount: 0,
                refund_ids: Vec::new(),
                status: OrderStatus::Paid,
                metadata: order.metadata,
                created_at: Utc::now(),
            });
        Ok(created.clone())
    }

    async fn record_refund(
        &self,
        reference: &str,
        refund_id: Option<&str>,
        amount: i64,
    ) -> anyhow::Result<RefundApplied> {
        if amount <= 0 {
            bail!("refund amount must be positive, got {amount}");
        }
        let mut orders = self.orders.write();
        let order = orders
            .get_mut(reference)
            .ok_or_else(|| anyhow!("order {reference} not found"))?;

        if let Some(refund_id) = refund_id {
            if order.has_refund(refund_id) {
                return Ok(RefundApplied::AlreadyApplied(order.clone()));
            }
            order.refund_ids.push(refund_id.to_string());
        }

        order.refunded_amount += amount.min(order.refundable());
        order.status = if order.refundable() == 0 {
            OrderStatus::Refunded
        } else {
            OrderStatus::PartiallyRefunded
        };
        Ok(RefundApplied::Recorded(order.clone()))
    }
}

/// Subscriptions keyed by subscription code
#[derive(Debug, Default)]
pub struct InMemorySubscriptions {
    subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl InMemorySubscriptions {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Whether no subscriptions exist
    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// Snapshot of one subscription
    pub fn get(&self, code: &str) -> Option<Subscription> {
        self.subscriptions.read().get(code).cloned()
    }
}

#[async_trait]
impl SubscriptionService for InMemorySubscriptions {
    async fn find(&self, code: &str) -> anyhow::Result<Option<Subscription>> {
        Ok(self.get(code))
    }

    async fn create(&self, subscription: NewSubscription) -> anyhow::Result<Subscription> {
        let now = Utc::now();
        let mut subscriptions = self.subscriptions.write();
        let created = subscriptions
            .entry(subscription.code.clone())
            .or_insert_with(|| Subscription {
                code: subscription.code,
                customer_email: subscription.customer_email,
                plan_code: subscription.plan_code,
                amount: subscription.amount,
                status: SubscriptionStatus::Active,
                next_payment_date: subscription.next_payment_date,
                created_at: now,
                updated_at: now,
            });
        Ok(created.clone())
    }

    async fn update_status(
        &self,
        code: &str,
        status: SubscriptionStatus,
    ) -> anyhow::Result<Subscription> {
        let mut subscriptions = self.subscriptions.write();
        let subscription = subscriptions
            .get_mut(code)
            .ok_or_else(|| anyhow!("subscription {code} not found"))?;
        subscription.status = status;
        subscription.updated_at = Utc::now();
        Ok(subscription.clone())
    }
}

/// Notifier that logs each message and keeps it in an outbox
#[derive(Debug, Default)]
pub struct OutboxNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl OutboxNotifier {
    /// Create a notifier with an empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail (simulates a mail outage)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages sent so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("mail transport unavailable");
        }
        info!(
            kind = notification.kind(),
            recipient = %redact_email(notification.recipient()),
            "Notification sent"
        );
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

/// Handles to the concrete in-memory stores behind a [`Collaborators`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryDomain {
    /// Orders
    pub orders: Arc<InMemoryOrders>,
    /// Subscriptions
    pub subscriptions: Arc<InMemorySubscriptions>,
    /// Outbox
    pub notifier: Arc<OutboxNotifier>,
}

impl InMemoryDomain {
    /// Fresh empty stores
    pub fn new() -> Self {
        Self::default()
    }

    /// Trait-object view for the dispatcher
    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.orders.clone(),
            self.subscriptions.clone(),
            self.notifier.clone(),
        )
    }
}
