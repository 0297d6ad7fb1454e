//! Structured Webhook Logging
//!
//! One [`EventLogger`] per delivery. It owns a `webhook` span carrying the
//! constant context (delivery id, event id, event type, receipt time, partial
//! signature) and emits one event per phase, so the full lifecycle of an
//! event id can be rebuilt from logs alone:
//!
//! ```text
//! accepted -> signature -> idempotency -> validation -> case start/success|error -> completed
//!                                                                                 \-> timed_out
//! ```
//!
//! Handlers receive a [`CaseLogger`] value rather than touching the span.
//! Error text is passed through [`redact_text`] before it is logged, since
//! collaborator errors may quote customer emails.

use std::fmt::Display;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Span};
use uuid::Uuid;

use crate::webhook::dispatcher::{CaseOutcome, DispatchResult};
use crate::webhook::identity::{EventId, IdSource};
use crate::webhook::ledger::{IdempotencyDecision, ProcessingStatus};
use crate::webhook::redact::{partial_signature, redact_text, redact_value};
use crate::webhook::signature::SignatureCheck;
use crate::webhook::validation::ValidationReport;

fn scrub(error: &dyn Display) -> String {
    redact_text(&error.to_string()).into_owned()
}

/// Per-delivery logger
#[derive(Debug, Clone)]
pub struct EventLogger {
    span: Span,
    delivery_id: Uuid,
    event_id: EventId,
}

impl EventLogger {
    /// Create the logger for one delivery
    pub fn new(
        event_id: &EventId,
        event_type: &str,
        received_at: DateTime<Utc>,
        signature: Option<&str>,
    ) -> Self {
        let delivery_id = Uuid::new_v4();
        let span = info_span!(
            "webhook",
            %delivery_id,
            event_id = %event_id,
            event_type,
            received_at = %received_at.to_rfc3339(),
            sig = %partial_signature(signature),
        );
        Self {
            span,
            delivery_id,
            event_id: event_id.clone(),
        }
    }

    /// Span carrying the constant context; instrument spawned work with it
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Unique id of this delivery attempt
    pub fn delivery_id(&self) -> Uuid {
        self.delivery_id
    }

    /// Event the logger belongs to
    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Body parsed and id resolved
    pub fn accepted(&self, body_len: usize, payload: &Value) {
        self.span.in_scope(|| {
            info!(body_len, id_source = self.event_id.source().tag(), "Webhook received");
            debug!(payload = %redact_value(payload), "Webhook payload");
            if self.event_id.source() == IdSource::ContentHash {
                warn!("No sender id or reference; content-hash id cannot deduplicate retries");
            }
        });
    }

    /// Result of signature verification
    pub fn signature(&self, check: SignatureCheck) {
        self.span.in_scope(|| match check {
            SignatureCheck::Valid => debug!(signature = check.as_str(), "Signature verified"),
            SignatureCheck::Bypassed => {
                warn!(signature = check.as_str(), "Signature verification bypassed")
            }
            SignatureCheck::Invalid | SignatureCheck::Missing => {
                warn!(signature = check.as_str(), "Rejecting webhook: signature check failed")
            }
        });
    }

    /// Result of the idempotency check and reservation
    pub fn idempotency(&self, decision: &IdempotencyDecision) {
        self.span.in_scope(|| match decision {
            IdempotencyDecision::Fresh => debug!("Event reserved in ledger"),
            IdempotencyDecision::Duplicate(status) => info!(
                status = status.map(|s| s.as_str()).unwrap_or("unknown"),
                "Event already recorded, skipping handlers"
            ),
            IdempotencyDecision::Reclaimed => {
                warn!("Processing reservation outlived its lease; reclaiming")
            }
            IdempotencyDecision::Degraded(reason) => error!(
                reason = %redact_text(reason),
                "Ledger unavailable; processing without reservation"
            ),
        });
    }

    /// Ledger lookup failed; processing continues
    pub fn ledger_lookup_failed(&self, error: &dyn Display) {
        self.span.in_scope(|| {
            error!(error = %scrub(error), "Ledger lookup failed; assuming event not yet processed")
        });
    }

    /// Result of payload validation
    pub fn validation(&self, report: &ValidationReport) {
        self.span.in_scope(|| {
            if report.is_clean() {
                debug!(kind = report.event.kind().as_str(), "Payload validated");
            } else {
                warn!(
                    kind = report.event.kind().as_str(),
                    issues = ?report.issues,
                    "Payload did not match its schema; handling as generic event"
                );
            }
        });
    }

    /// Logger for one handler case
    pub fn case(&self, case: &'static str) -> CaseLogger {
        let span = info_span!(parent: &self.span, "case", case);
        CaseLogger {
            span,
            case,
            started: Instant::now(),
        }
    }

    /// Terminal status written
    pub fn completed(&self, result: &DispatchResult, elapsed: Duration) {
        self.span.in_scope(|| {
            let elapsed_ms = elapsed.as_millis() as u64;
            match result.status {
                ProcessingStatus::Failed => error!(
                    status = result.status.as_str(),
                    error = %redact_text(result.error.as_deref().unwrap_or("")),
                    elapsed_ms,
                    "Webhook processing failed"
                ),
                status => info!(
                    status = status.as_str(),
                    outcome = %redact_text(result.outcome.as_deref().unwrap_or("")),
                    elapsed_ms,
                    "Webhook processing completed"
                ),
            }
        });
    }

    /// Infrastructure failure after authentication; absorbed into 202
    pub fn failed(&self, error: &dyn Display) {
        self.span
            .in_scope(|| error!(error = %scrub(error), "Webhook infrastructure failure"));
    }

    /// Processing exceeded the timeout; it continues in the background
    pub fn timed_out(&self, timeout: Duration) {
        self.span.in_scope(|| {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Processing exceeded timeout; acknowledging and continuing in background"
            )
        });
    }

    /// Operator-triggered replay of a failed or abandoned event
    pub fn replaying(&self, from: ProcessingStatus) {
        self.span
            .in_scope(|| info!(from = from.as_str(), "Replaying event from stored payload"));
    }
}

/// Logger handed to a single handler case
#[derive(Debug)]
pub struct CaseLogger {
    span: Span,
    case: &'static str,
    started: Instant,
}

impl CaseLogger {
    /// Case name (event kind)
    pub fn case(&self) -> &'static str {
        self.case
    }

    /// Handler starting
    pub fn start(&self) {
        self.span.in_scope(|| debug!("Handler started"));
    }

    /// Intermediate step worth recording
    pub fn step(&self, message: &str) {
        self.span.in_scope(|| debug!(step = message, "Handler step"));
    }

    /// Handler succeeded
    pub fn success(&self, outcome: &CaseOutcome) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        self.span.in_scope(|| match outcome {
            CaseOutcome::Applied(note) => {
                info!(outcome = %redact_text(note), elapsed_ms, "Handler applied")
            }
            CaseOutcome::Unchanged(note) => {
                info!(outcome = %redact_text(note), elapsed_ms, "Handler made no change")
            }
        });
    }

    /// Handler failed
    pub fn error(&self, error: &dyn Display) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        self.span
            .in_scope(|| error!(error = %scrub(error), elapsed_ms, "Handler failed"));
    }

    /// Best-effort notification failed; the case still succeeds
    pub fn notification_failed(&self, error: &dyn Display) {
        self.span.in_scope(|| {
            warn!(error = %scrub(error), "Notification failed; continuing")
        });
    }
}
