//! Webhook Receiver
//!
//! Runs every delivery through a fixed protocol and maps the result to one of
//! two HTTP statuses:
//!
//! ```text
//! POST /webhooks/payments
//!       |
//!       v
//! [Parse JSON] ----------------------------> 400 (malformed)
//!       |
//!       v
//! [Resolve event id, open logger]
//!       |
//!       v
//! [Verify signature] ----------------------> 400 (nothing written)
//!       |
//!       v
//! [exists? then reserve] --- recorded -----> 202 (duplicate)
//!       |                  \-- stale processing: reclaim and continue
//!       v
//! [Spawn: validate -> dispatch -> record] -- timeout --> 202, task keeps running
//!       |
//!       v
//!      202
//! ```
//!
//! Everything after signature verification answers `202`: handler failures are
//! recorded in the ledger and retried through [`WebhookPipeline::replay`], not
//! through sender redelivery.
//!
//! Processing tasks are owned by the pipeline. [`WebhookPipeline::drain`] waits
//! for all of them, so a graceful shutdown never drops a timed-out task before
//! it writes its terminal status.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{info, instrument, warn, Instrument};

use crate::domain::Collaborators;
use crate::metrics::WebhookMetrics;
use crate::webhook::config::WebhookConfig;
use crate::webhook::dispatcher::{DispatchResult, EventDispatcher};
use crate::webhook::error::{WebhookError, WebhookResult};
use crate::webhook::identity::{resolve_id, EventId};
use crate::webhook::ledger::{
    IdempotencyDecision, IdempotencyLedger, ProcessingStatus, Reservation,
};
use crate::webhook::logger::EventLogger;
use crate::webhook::redact::redact_text;
use crate::webhook::signature::{SignatureCheck, SignatureVerifier};
use crate::webhook::validation::validate;

/// Route the payment processor posts to
pub const WEBHOOK_PATH: &str = "/webhooks/payments";

/// Result of one ingestion
#[derive(Debug)]
pub enum IngestOutcome {
    /// Body was not a JSON object
    Malformed(WebhookError),
    /// Signature missing or wrong
    Unauthenticated(WebhookError),
    /// The ledger already held the event
    Duplicate {
        /// Resolved id
        event_id: EventId,
        /// Recorded status, when the ledger could report it
        status: Option<ProcessingStatus>,
    },
    /// Processing finished within the timeout
    Completed {
        /// Resolved id
        event_id: EventId,
        /// Terminal status written
        status: ProcessingStatus,
    },
    /// Processing outlived the timeout and continues in the background
    Deferred {
        /// Resolved id
        event_id: EventId,
    },
}

impl IngestOutcome {
    /// HTTP status for the sender: `400` or `202`, nothing else
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Malformed(_) | Self::Unauthenticated(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::ACCEPTED,
        }
    }

    /// Value of the `status` field in the response body
    pub fn label(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "invalid_payload",
            Self::Unauthenticated(_) => "invalid_signature",
            Self::Duplicate { .. } => "duplicate",
            Self::Completed { .. } | Self::Deferred { .. } => "accepted",
        }
    }

    /// Resolved event id, once known
    pub fn event_id(&self) -> Option<&EventId> {
        match self {
            Self::Malformed(_) | Self::Unauthenticated(_) => None,
            Self::Duplicate { event_id, .. }
            | Self::Completed { event_id, .. }
            | Self::Deferred { event_id } => Some(event_id),
        }
    }
}

/// Validation, dispatch and the terminal ledger write; runs in its own task
#[derive(Clone)]
struct Processor {
    ledger: Arc<dyn IdempotencyLedger>,
    dispatcher: EventDispatcher,
    metrics: Arc<WebhookMetrics>,
}

impl Processor {
    async fn process(
        self,
        payload: Value,
        raw: String,
        event_id: EventId,
        logger: EventLogger,
    ) -> DispatchResult {
        let started = Instant::now();
        self.metrics.processing_started();

        let report = validate(&payload);
        logger.validation(&report);
        let event_type = report.event.event_type().to_string();

        let result = self.dispatcher.dispatch(&report.event, &logger).await;
        let elapsed = started.elapsed();
        self.metrics
            .record_completed(&event_type, result.status, elapsed);

        if let Err(e) = self
            .ledger
            .record(&event_id, &event_type, &raw, result.completion())
            .await
        {
            self.metrics.record_ledger_error();
            logger.failed(&WebhookError::from(e));
        }

        logger.completed(&result, elapsed);
        self.metrics.processing_finished();
        result
    }
}

/// The ingestion pipeline behind the webhook route
pub struct WebhookPipeline {
    config: WebhookConfig,
    verifier: SignatureVerifier,
    processor: Processor,
    tasks: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for WebhookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookPipeline")
            .field("config", &self.config)
            .field("verifier", &self.verifier)
            .field("tasks", &self.tasks.lock().len())
            .finish_non_exhaustive()
    }
}

impl WebhookPipeline {
    /// Assemble a pipeline from a validated configuration
    pub fn new(
        config: WebhookConfig,
        ledger: Arc<dyn IdempotencyLedger>,
        collaborators: Collaborators,
    ) -> Self {
        let verifier = SignatureVerifier::from_config(&config);
        if verifier.is_bypassing() {
            warn!(
                mode = config.mode().as_str(),
                "Webhook signature verification is DISABLED"
            );
        }
        Self {
            config,
            verifier,
            processor: Processor {
                ledger,
                dispatcher: EventDispatcher::new(collaborators),
                metrics: Arc::new(WebhookMetrics::new()),
            },
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Share an existing metrics registry
    pub fn with_metrics(mut self, metrics: Arc<WebhookMetrics>) -> Self {
        self.processor.metrics = metrics;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Ledger handle
    pub fn ledger(&self) -> Arc<dyn IdempotencyLedger> {
        Arc::clone(&self.processor.ledger)
    }

    /// Metrics registry
    pub fn metrics(&self) -> Arc<WebhookMetrics> {
        Arc::clone(&self.processor.metrics)
    }

    /// Ingest one delivery
    pub async fn ingest(&self, raw: &[u8], signature: Option<&str>) -> IngestOutcome {
        let received_at = Utc::now();
        let metrics = &self.processor.metrics;
        metrics.record_received();

        let payload = match serde_json::from_slice::<Value>(raw) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => return self.reject_malformed("body is not a JSON object".into()),
            Err(e) => return self.reject_malformed(e.to_string()),
        };

        let event_id = resolve_id(&payload, received_at);
        let event_type = payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let logger = EventLogger::new(&event_id, &event_type, received_at, signature);
        logger.accepted(raw.len(), &payload);

        let check = self.verifier.check(raw, signature);
        logger.signature(check);
        if !check.is_authentic() {
            metrics.record_unauthenticated();
            let error = match check {
                SignatureCheck::Missing => WebhookError::MissingSignature,
                _ => WebhookError::InvalidSignature,
            };
            return IngestOutcome::Unauthenticated(error);
        }

        let raw_text = String::from_utf8_lossy(raw).into_owned();
        let decision = self
            .claim(&event_id, &event_type, &raw_text, &logger)
            .await;
        logger.idempotency(&decision);
        if let IdempotencyDecision::Duplicate(status) = decision {
            metrics.record_duplicate();
            return IngestOutcome::Duplicate { event_id, status };
        }

        let (done, result) = oneshot::channel();
        let processing = self.processor.clone().process(
            payload,
            raw_text,
            event_id.clone(),
            logger.clone(),
        );
        self.track(
            async move {
                let _ = done.send(processing.await);
            }
            .instrument(logger.span().clone()),
        );

        let limit = self.config.processing_timeout();
        match timeout(limit, result).await {
            Ok(Ok(result)) => IngestOutcome::Completed {
                event_id,
                status: result.status,
            },
            Ok(Err(_)) => {
                logger.failed(&WebhookError::InternalError(
                    "processing task ended without a result".to_string(),
                ));
                IngestOutcome::Completed {
                    event_id,
                    status: ProcessingStatus::Failed,
                }
            }
            Err(_) => {
                metrics.record_timeout();
                logger.timed_out(limit);
                IngestOutcome::Deferred { event_id }
            }
        }
    }

    /// Wait for every processing task, including ones that outlived the timeout.
    ///
    /// Returns the number of tasks that were still tracked.
    pub async fn drain(&self) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let pending = tasks.len();
        if pending > 0 {
            info!(pending, "Draining in-flight webhook processing");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(
                    error = %redact_text(&e.to_string()),
                    "Webhook processing task ended abnormally"
                );
            }
        }
        pending
    }

    /// Re-run a `failed` event, or a `processing` one whose lease has expired,
    /// from its stored payload
    pub async fn replay(&self, event_id: &EventId) -> WebhookResult<DispatchResult> {
        let ledger = &self.processor.ledger;
        let record = ledger
            .get(event_id)
            .await?
            .ok_or_else(|| WebhookError::ReplayRejected(format!("{event_id} not found")))?;

        let status = record.processing_status;
        if !matches!(status, ProcessingStatus::Failed | ProcessingStatus::Processing) {
            return Err(WebhookError::ReplayRejected(format!(
                "{event_id} is {}; only failed or abandoned events can be replayed",
                status.as_str()
            )));
        }

        let payload: Value = serde_json::from_str(&record.payload)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

        let reopened = match status {
            ProcessingStatus::Failed => ledger.reopen_failed(event_id).await?,
            _ => ledger.reopen_stale(event_id, self.config.stale_after()).await?,
        };
        if !reopened {
            return Err(WebhookError::ReplayRejected(format!(
                "{event_id} is being processed; its lease has not expired"
            )));
        }

        let logger = EventLogger::new(event_id, &record.event_type, Utc::now(), None);
        logger.replaying(status);
        let span = logger.span().clone();
        Ok(self
            .processor
            .clone()
            .process(payload, record.payload, event_id.clone(), logger)
            .instrument(span)
            .await)
    }

    /// `exists` then atomic `reserve`; ledger failures degrade to processing
    async fn claim(
        &self,
        event_id: &EventId,
        event_type: &str,
        raw: &str,
        logger: &EventLogger,
    ) -> IdempotencyDecision {
        let ledger = &self.processor.ledger;
        let metrics = &self.processor.metrics;

        match ledger.exists(event_id).await {
            Ok(true) => {
                let status = match ledger.get(event_id).await {
                    Ok(record) => record.map(|r| r.processing_status),
                    Err(_) => None,
                };
                return self.reclaim_or_skip(event_id, status).await;
            }
            Ok(false) => {}
            Err(e) => {
                metrics.record_ledger_error();
                logger.ledger_lookup_failed(&e);
            }
        }

        match ledger.reserve(event_id, event_type, raw).await {
            Ok(Reservation::Acquired) => IdempotencyDecision::Fresh,
            Ok(Reservation::AlreadyRecorded(status)) => {
                self.reclaim_or_skip(event_id, Some(status)).await
            }
            Err(e) => {
                metrics.record_ledger_error();
                IdempotencyDecision::Degraded(e.to_string())
            }
        }
    }

    /// A recorded event is a duplicate unless it is a `processing` reservation
    /// past its lease, which this delivery takes over
    async fn reclaim_or_skip(
        &self,
        event_id: &EventId,
        status: Option<ProcessingStatus>,
    ) -> IdempotencyDecision {
        if status != Some(ProcessingStatus::Processing) {
            return IdempotencyDecision::Duplicate(status);
        }
        match self
            .processor
            .ledger
            .reopen_stale(event_id, self.config.stale_after())
            .await
        {
            Ok(true) => IdempotencyDecision::Reclaimed,
            Ok(false) => IdempotencyDecision::Duplicate(status),
            Err(e) => {
                self.processor.metrics.record_ledger_error();
                warn!(error = %e, "Could not check processing lease; treating as duplicate");
                IdempotencyDecision::Duplicate(status)
            }
        }
    }

    /// Spawn a processing task owned by the pipeline, reaping finished ones
    fn track<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                warn!(
                    error = %redact_text(&e.to_string()),
                    "Webhook processing task ended abnormally"
                );
            }
        }
        tasks.spawn(task);
    }

    fn reject_malformed(&self, reason: String) -> IngestOutcome {
        self.processor.metrics.record_malformed();
        let error = WebhookError::InvalidPayload(reason);
        warn!(error = %error, "Rejecting webhook: malformed body");
        IngestOutcome::Malformed(error)
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Body of every webhook response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    /// Outcome label; never reveals handler results
    pub status: String,
}

/// `POST /webhooks/payments`
#[instrument(skip_all, fields(body_len = body.len()))]
pub async fn webhook_handler(
    State(pipeline): State<Arc<WebhookPipeline>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(pipeline.config().signature_header())
        .and_then(|value| value.to_str().ok());

    let outcome = pipeline.ingest(&body, signature).await;
    (
        outcome.status_code(),
        Json(AckResponse {
            status: outcome.label().to_string(),
        }),
    )
}

/// Router exposing the webhook route
pub fn webhook_router(pipeline: Arc<WebhookPipeline>) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(webhook_handler))
        .with_state(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InMemoryDomain;
    use crate::webhook::ledger::InMemoryLedger;
    use crate::webhook::signature::sign;
    use serde_json::json;
    use std::time::Duration;

    fn pipeline() -> (WebhookPipeline, Arc<InMemoryLedger>, InMemoryDomain) {
        let ledger = Arc::new(InMemoryLedger::new());
        let domain = InMemoryDomain::new();
        let pipeline = WebhookPipeline::new(
            WebhookConfig::test_config(),
            ledger.clone(),
            domain.collaborators(),
        );
        (pipeline, ledger, domain)
    }

    fn signed(pipeline: &WebhookPipeline, body: &[u8]) -> String {
        sign(pipeline.config().secret().unwrap(), body)
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let (pipeline, ledger, _) = pipeline();

        let outcome = pipeline.ingest(b"{not json", None).await;
        assert_eq!(outcome.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(outcome.label(), "invalid_payload");

        let outcome = pipeline.ingest(b"[1, 2, 3]", None).await;
        assert!(matches!(outcome, IngestOutcome::Malformed(_)));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_missing_signature_writes_nothing() {
        let (pipeline, ledger, _) = pipeline();
        let body = br#"{"id":"evt_1","event":"charge.success","data":{}}"#;

        let outcome = pipeline.ingest(body, None).await;
        assert!(matches!(
            outcome,
            IngestOutcome::Unauthenticated(WebhookError::MissingSignature)
        ));
        assert!(ledger.is_empty());
        assert_eq!(pipeline.metrics().snapshot().rejected_signature, 1);
    }

    #[tokio::test]
    async fn test_charge_then_duplicate() {
        let (pipeline, ledger, domain) = pipeline();
        let body = json!({
            "id": "evt_1",
            "event": "charge.success",
            "data": {
                "reference": "ref_A",
                "amount": 10000,
                "currency": "ZAR",
                "customer": {"email": "alice@example.com"}
            }
        })
        .to_string();
        let signature = signed(&pipeline, body.as_bytes());

        let first = pipeline.ingest(body.as_bytes(), Some(&signature)).await;
        assert!(matches!(
            first,
            IngestOutcome::Completed {
                status: ProcessingStatus::Processed,
                ..
            }
        ));

        let second = pipeline.ingest(body.as_bytes(), Some(&signature)).await;
        assert!(matches!(
            second,
            IngestOutcome::Duplicate {
                status: Some(ProcessingStatus::Processed),
                ..
            }
        ));
        assert_eq!(second.status_code(), StatusCode::ACCEPTED);

        assert_eq!(domain.orders.len(), 1);
        assert_eq!(ledger.len(), 1);
        let record = ledger.records().remove(0);
        assert_eq!(record.event_id.as_str(), "evt:evt_1");
        assert_eq!(record.payload, body);
    }

    #[tokio::test]
    async fn test_replay_rejects_non_failed() {
        let (pipeline, _, _) = pipeline();
        let missing = EventId::parse("evt:nope").unwrap();
        assert!(matches!(
            pipeline.replay(&missing).await,
            Err(WebhookError::ReplayRejected(_))
        ));

        let body = br#"{"id":"evt_u","event":"transfer.success","data":{}}"#;
        let signature = signed(&pipeline, body);
        pipeline.ingest(body, Some(&signature)).await;

        let skipped = EventId::parse("evt:evt_u").unwrap();
        let err = pipeline.replay(&skipped).await.unwrap_err();
        assert!(err.to_string().contains("only failed or abandoned events"));
    }

    #[tokio::test]
    async fn test_stale_reservation_is_reclaimed() {
        let ledger = Arc::new(InMemoryLedger::new());
        let domain = InMemoryDomain::new();
        let config = WebhookConfig::test_config()
            .with_stale_after(Duration::from_millis(250))
            .unwrap();
        let pipeline = WebhookPipeline::new(config, ledger.clone(), domain.collaborators());

        let body = json!({
            "id": "evt_stuck",
            "event": "charge.success",
            "data": {"reference": "ref_S", "amount": 500, "currency": "ZAR"}
        })
        .to_string();
        let id = EventId::parse("evt:evt_stuck").unwrap();
        ledger.reserve(&id, "charge.success", &body).await.unwrap();

        // Within the lease the reservation still belongs to its owner.
        let signature = signed(&pipeline, body.as_bytes());
        let first = pipeline.ingest(body.as_bytes(), Some(&signature)).await;
        assert!(matches!(
            first,
            IngestOutcome::Duplicate {
                status: Some(ProcessingStatus::Processing),
                ..
            }
        ));

        tokio::time::sleep(Duration::from_millis(400)).await;
        let second = pipeline.ingest(body.as_bytes(), Some(&signature)).await;
        assert!(matches!(
            second,
            IngestOutcome::Completed {
                status: ProcessingStatus::Processed,
                ..
            }
        ));
        assert!(domain.orders.get("ref_S").is_some());
    }

    #[tokio::test]
    async fn test_drain_waits_for_tracked_tasks() {
        let (pipeline, ledger, _) = pipeline();
        assert_eq!(pipeline.drain().await, 0);

        let body = br#"{"id":"evt_d","event":"transfer.success","data":{}}"#;
        let signature = signed(&pipeline, body);
        pipeline.ingest(body, Some(&signature)).await;
        pipeline.drain().await;

        let id = EventId::parse("evt:evt_d").unwrap();
        let record = ledger.get(&id).await.unwrap().unwrap();
        assert_eq!(record.processing_status, ProcessingStatus::Skipped);
        assert_eq!(pipeline.drain().await, 0);
    }

    #[test]
    fn test_outcome_labels() {
        let id = EventId::parse("evt:1").unwrap();
        let deferred = IngestOutcome::Deferred {
            event_id: id.clone(),
        };
        assert_eq!(deferred.status_code(), StatusCode::ACCEPTED);
        assert_eq!(deferred.label(), "accepted");
        assert_eq!(deferred.event_id(), Some(&id));

        let rejected = IngestOutcome::Unauthenticated(WebhookError::InvalidSignature);
        assert_eq!(rejected.status_code(), StatusCode::BAD_REQUEST);
        assert!(rejected.event_id().is_none());
    }
}
