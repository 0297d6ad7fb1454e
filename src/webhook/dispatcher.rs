//! Event Dispatcher
//!
//! Routes a validated [`PaymentEvent`] to its handler and turns whatever the
//! handler does into exactly one terminal status:
//!
//! | Handler result       | Status      |
//! |----------------------|-------------|
//! | `Ok(outcome)`        | `processed` |
//! | `Err(_)` or a panic  | `failed`    |
//! | generic event        | `skipped`   |
//!
//! Handlers check the domain record keyed by the processor's reference before
//! creating anything, so a redelivery that slips past the ledger is still a
//! no-op.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::domain::{
    Collaborators, NewOrder, NewSubscription, Notification, OrderStatus, RefundApplied,
    SubscriptionStatus,
};
use crate::webhook::error::{WebhookError, WebhookResult};
use crate::webhook::events::{ChargeData, InvoiceData, PaymentEvent, RefundData, SubscriptionData};
use crate::webhook::ledger::{Completion, ProcessingStatus};
use crate::webhook::logger::{CaseLogger, EventLogger};
use crate::webhook::redact::redact_text;

/// What a successful handler did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    /// State changed
    Applied(String),
    /// Nothing to do; the note says why
    Unchanged(String),
}

impl CaseOutcome {
    /// The outcome note stored in the ledger
    pub fn note(&self) -> &str {
        match self {
            Self::Applied(note) | Self::Unchanged(note) => note,
        }
    }
}

impl fmt::Display for CaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.note())
    }
}

/// Terminal result of dispatching one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    /// Terminal status
    pub status: ProcessingStatus,
    /// Outcome note (processed and skipped events)
    pub outcome: Option<String>,
    /// Error message (failed events)
    pub error: Option<String>,
}

impl DispatchResult {
    fn processed(outcome: &CaseOutcome) -> Self {
        Self {
            status: ProcessingStatus::Processed,
            outcome: Some(outcome.note().to_string()),
            error: None,
        }
    }

    fn failed(error: &WebhookError) -> Self {
        Self {
            status: ProcessingStatus::Failed,
            outcome: None,
            error: Some(error.to_string()),
        }
    }

    fn skipped(reason: String) -> Self {
        Self {
            status: ProcessingStatus::Skipped,
            outcome: Some(reason),
            error: None,
        }
    }

    /// Ledger write for this result
    pub fn completion(&self) -> Completion {
        Completion {
            status: self.status,
            error_message: self.error.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Routes events to handlers with failure isolation
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    collaborators: Collaborators,
}

impl EventDispatcher {
    /// Create a dispatcher over the given collaborators
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    /// Run the handler for `event`. Never panics and never returns an error.
    pub async fn dispatch(&self, event: &PaymentEvent, logger: &EventLogger) -> DispatchResult {
        if let PaymentEvent::Generic(generic) = event {
            return DispatchResult::skipped(generic.reason.describe());
        }

        let case = logger.case(event.kind().as_str());
        case.start();

        let result = AssertUnwindSafe(self.run_case(event, &case))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(outcome)) => {
                case.success(&outcome);
                DispatchResult::processed(&outcome)
            }
            Ok(Err(error)) => {
                case.error(&error);
                DispatchResult::failed(&error)
            }
            Err(panic) => {
                let error = WebhookError::HandlerPanicked(panic_message(panic.as_ref()));
                case.error(&error);
                DispatchResult::failed(&error)
            }
        }
    }

    async fn run_case(
        &self,
        event: &PaymentEvent,
        case: &CaseLogger,
    ) -> WebhookResult<CaseOutcome> {
        match event {
            PaymentEvent::ChargeSuccess(charge) => self.on_charge_success(charge, case).await,
            PaymentEvent::RefundProcessed(refund) => self.on_refund_processed(refund, case).await,
            PaymentEvent::SubscriptionCreated(sub) => self.on_subscription_created(sub, case).await,
            PaymentEvent::SubscriptionDisabled(sub) => {
                self.on_subscription_status(sub, SubscriptionStatus::Cancelled, case)
                    .await
            }
            PaymentEvent::SubscriptionNotRenewing(sub) => {
                self.on_subscription_status(sub, SubscriptionStatus::NonRenewing, case)
                    .await
            }
            PaymentEvent::InvoicePaymentFailed(invoice) => {
                self.on_invoice_payment_failed(invoice, case).await
            }
            PaymentEvent::Generic(generic) => Err(WebhookError::InternalError(format!(
                "generic event {} reached a handler",
                generic.event
            ))),
        }
    }

    async fn on_charge_success(
        &self,
        charge: &ChargeData,
        case: &CaseLogger,
    ) -> WebhookResult<CaseOutcome> {
        let orders = &self.collaborators.orders;

        if orders
            .find_by_reference(&charge.reference)
            .await
            .map_err(collaborator("order lookup"))?
            .is_some()
        {
            return Ok(CaseOutcome::Unchanged("order already exists".into()));
        }

        let order = orders
            .create_order(NewOrder {
                reference: charge.reference.clone(),
                amount: charge.amount,
                currency: charge.currency.clone(),
                customer_email: charge.customer.email.clone(),
                metadata: charge.metadata.clone(),
            })
            .await
            .map_err(collaborator("order creation"))?;
        case.step("order created");

        self.notify(
            Notification::OrderConfirmation {
                email: order.customer_email.clone(),
                reference: order.reference.clone(),
                amount: order.amount,
                currency: order.currency.clone(),
            },
            case,
        )
        .await;

        Ok(CaseOutcome::Applied("order created".into()))
    }

    async fn on_refund_processed(
        &self,
        refund: &RefundData,
        case: &CaseLogger,
    ) -> WebhookResult<CaseOutcome> {
        let orders = &self.collaborators.orders;

        let Some(order) = orders
            .find_by_reference(&refund.transaction_reference)
            .await
            .map_err(collaborator("order lookup"))?
        else {
            return Ok(CaseOutcome::Unchanged("skipped: order not found".into()));
        };

        let refund_id = refund.id.map(|id| id.to_string());
        let seen = refund_id.as_deref().is_some_and(|id| order.has_refund(id));
        if seen || order.status == OrderStatus::Refunded {
            return Ok(CaseOutcome::Unchanged("refund already recorded".into()));
        }

        // No amount means a full refund of what remains.
        let amount = refund.amount.unwrap_or_else(|| order.refundable());
        let updated = match orders
            .record_refund(&order.reference, refund_id.as_deref(), amount)
            .await
            .map_err(collaborator("refund recording"))?
        {
            RefundApplied::Recorded(order) => order,
            RefundApplied::AlreadyApplied(_) => {
                return Ok(CaseOutcome::Unchanged("refund already recorded".into()));
            }
        };
        case.step("refund recorded");

        self.notify(
            Notification::RefundProcessed {
                email: updated.customer_email.clone(),
                reference: updated.reference.clone(),
                amount,
                currency: refund
                    .currency
                    .clone()
                    .unwrap_or_else(|| updated.currency.clone()),
            },
            case,
        )
        .await;

        Ok(CaseOutcome::Applied("refund recorded".into()))
    }

    async fn on_subscription_created(
        &self,
        subscription: &SubscriptionData,
        _case: &CaseLogger,
    ) -> WebhookResult<CaseOutcome> {
        let subscriptions = &self.collaborators.subscriptions;

        if subscriptions
            .find(&subscription.subscription_code)
            .await
            .map_err(collaborator("subscription lookup"))?
            .is_some()
        {
            return Ok(CaseOutcome::Unchanged("subscription already exists".into()));
        }

        subscriptions
            .create(NewSubscription {
                code: subscription.subscription_code.clone(),
                customer_email: subscription.customer.email.clone(),
                plan_code: subscription.plan.as_ref().map(|p| p.plan_code.clone()),
                amount: subscription.amount,
                next_payment_date: subscription.next_payment_date.clone(),
            })
            .await
            .map_err(collaborator("subscription creation"))?;

        Ok(CaseOutcome::Applied("subscription created".into()))
    }

    async fn on_subscription_status(
        &self,
        subscription: &SubscriptionData,
        target: SubscriptionStatus,
        case: &CaseLogger,
    ) -> WebhookResult<CaseOutcome> {
        let subscriptions = &self.collaborators.subscriptions;
        let code = &subscription.subscription_code;

        let Some(current) = subscriptions
            .find(code)
            .await
            .map_err(collaborator("subscription lookup"))?
        else {
            return Ok(CaseOutcome::Unchanged(
                "skipped: subscription not found".into(),
            ));
        };

        if current.status == target {
            return Ok(CaseOutcome::Unchanged("status unchanged".into()));
        }
        // A late not_renew must not revive a cancelled subscription.
        if current.status == SubscriptionStatus::Cancelled {
            return Ok(CaseOutcome::Unchanged("subscription already cancelled".into()));
        }

        let updated = subscriptions
            .update_status(code, target)
            .await
            .map_err(collaborator("subscription update"))?;

        if target == SubscriptionStatus::Cancelled {
            self.notify(
                Notification::SubscriptionCancelled {
                    email: updated.customer_email.clone(),
                    subscription_code: updated.code.clone(),
                },
                case,
            )
            .await;
        }

        Ok(CaseOutcome::Applied(format!("subscription {target}")))
    }

    async fn on_invoice_payment_failed(
        &self,
        invoice: &InvoiceData,
        case: &CaseLogger,
    ) -> WebhookResult<CaseOutcome> {
        let subscriptions = &self.collaborators.subscriptions;
        let code = &invoice.subscription.subscription_code;

        let Some(current) = subscriptions
            .find(code)
            .await
            .map_err(collaborator("subscription lookup"))?
        else {
            return Ok(CaseOutcome::Unchanged(
                "skipped: subscription not found".into(),
            ));
        };

        if current.status == SubscriptionStatus::Cancelled {
            return Ok(CaseOutcome::Unchanged("subscription already cancelled".into()));
        }

        let outcome = if current.status == SubscriptionStatus::Attention {
            CaseOutcome::Unchanged("status unchanged".into())
        } else {
            subscriptions
                .update_status(code, SubscriptionStatus::Attention)
                .await
                .map_err(collaborator("subscription update"))?;
            CaseOutcome::Applied("subscription attention".into())
        };

        // Notify on every failed invoice, even when the status is unchanged.
        let email = invoice
            .customer
            .as_ref()
            .map(|c| c.email.clone())
            .unwrap_or_else(|| current.customer_email.clone());
        self.notify(
            Notification::PaymentFailed {
                email,
                subscription_code: code.clone(),
                amount: invoice.amount,
            },
            case,
        )
        .await;

        Ok(outcome)
    }

    /// Best-effort send; a failure is logged and swallowed
    async fn notify(&self, notification: Notification, case: &CaseLogger) {
        match self.collaborators.notifier.send(&notification).await {
            Ok(()) => case.step(notification.kind()),
            Err(e) => case.notification_failed(&format!("{}: {e:#}", notification.kind())),
        }
    }
}

fn collaborator(context: &'static str) -> impl FnOnce(anyhow::Error) -> WebhookError {
    move |e| WebhookError::ProcessingFailed(redact_text(&format!("{context}: {e:#}")).into_owned())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        redact_text(s).into_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        redact_text(s).into_owned()
    } else {
        "non-string panic payload".to_string()
    }
}
