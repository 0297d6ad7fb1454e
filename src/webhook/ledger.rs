//! Idempotency Ledger
//!
//! Durable record of every accepted event. The receiver first asks
//! [`IdempotencyLedger::exists`], then claims the event with
//! [`IdempotencyLedger::reserve`], an atomic insert-if-absent. Only the caller
//! that gets [`Reservation::Acquired`] runs a handler; concurrent duplicates
//! see [`Reservation::AlreadyRecorded`].
//!
//! ```text
//! reserve ──▶ processing ──record──▶ processed | failed | skipped
//!              ▲   │  ▲                              │
//!              └───┘  └─────── reopen_failed ────────┘ (failed only)
//!          reopen_stale (processing older than a lease)
//! ```
//!
//! A `processing` record whose owner died (crash, or a task dropped at
//! shutdown) would otherwise block its event forever;
//! [`IdempotencyLedger::reopen_stale`] hands it to a new owner once its lease
//! has expired.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::webhook::error::LedgerResult;
use crate::webhook::identity::EventId;

/// Processing status of a ledger record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Reserved; a handler is running
    Processing,
    /// Handler completed
    Processed,
    /// Handler returned an error or panicked
    Failed,
    /// No handler applies (unknown type, schema mismatch)
    Skipped,
}

impl ProcessingStatus {
    /// Whether this is a terminal status
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// One ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    /// Primary key
    pub event_id: EventId,
    /// Sender's event discriminator
    pub event_type: String,
    /// Raw body, verbatim
    pub payload: String,
    /// Current status
    pub processing_status: ProcessingStatus,
    /// Error message for failed events
    pub error_message: Option<String>,
    /// Handler outcome note, e.g. "skipped: order not found"
    pub outcome: Option<String>,
    /// First acceptance
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// Result of an atomic reservation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The caller owns the event and must run its handler
    Acquired,
    /// Another delivery already claimed it
    AlreadyRecorded(ProcessingStatus),
}

/// How the receiver resolved idempotency for one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyDecision {
    /// Reserved; handlers run
    Fresh,
    /// Already recorded; handlers skipped. `None` when the lookup only saw existence.
    Duplicate(Option<ProcessingStatus>),
    /// A `processing` reservation past its lease; this delivery takes it over
    Reclaimed,
    /// Ledger unreachable; handlers run without a reservation
    Degraded(String),
}

impl IdempotencyDecision {
    /// Whether handlers should run
    pub fn should_process(&self) -> bool {
        !matches!(self, Self::Duplicate(_))
    }
}

/// Terminal status written after dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Terminal status
    pub status: ProcessingStatus,
    /// Error message (failed events)
    pub error_message: Option<String>,
    /// Outcome note
    pub outcome: Option<String>,
}

/// Storage seam for the ledger.
///
/// Implementations must make [`reserve`](Self::reserve) atomic: of any number
/// of concurrent calls for one id, exactly one returns `Acquired`.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync + 'static {
    /// Whether any record exists for the id
    async fn exists(&self, event_id: &EventId) -> LedgerResult<bool>;

    /// Insert a `processing` record if none exists
    async fn reserve(
        &self,
        event_id: &EventId,
        event_type: &str,
        payload: &str,
    ) -> LedgerResult<Reservation>;

    /// Write a terminal status.
    ///
    /// Updates a `processing` record in place, inserts when absent, and leaves
    /// an existing terminal record untouched.
    async fn record(
        &self,
        event_id: &EventId,
        event_type: &str,
        payload: &str,
        completion: Completion,
    ) -> LedgerResult<()>;

    /// Fetch a record
    async fn get(&self, event_id: &EventId) -> LedgerResult<Option<WebhookEventRecord>>;

    /// Atomically move a `failed` record back to `processing`.
    ///
    /// Returns `false` if the record is missing or not failed.
    async fn reopen_failed(&self, event_id: &EventId) -> LedgerResult<bool>;

    /// Atomically take over a `processing` record not updated for `older_than`.
    ///
    /// On success the record's `updated_at` is refreshed, so of several
    /// concurrent callers only one wins. Returns `false` if the record is
    /// missing, terminal, or still within its lease.
    async fn reopen_stale(&self, event_id: &EventId, older_than: Duration) -> LedgerResult<bool>;

    /// Liveness probe used by the readiness endpoint
    async fn ping(&self) -> LedgerResult<()> {
        Ok(())
    }
}

/// In-process ledger
///
/// The mutex guards plain map operations only and is never held across an
/// `.await`.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: Mutex<HashMap<EventId, WebhookEventRecord>>,
}

impl InMemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the ledger is empty
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Snapshot of all records, oldest first
    pub fn records(&self) -> Vec<WebhookEventRecord> {
        let mut records: Vec<_> = self.records.lock().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Number of records per status
    pub fn count_by_status(&self) -> HashMap<ProcessingStatus, usize> {
        let mut counts = HashMap::new();
        for record in self.records.lock().values() {
            *counts.entry(record.processing_status).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn exists(&self, event_id: &EventId) -> LedgerResult<bool> {
        Ok(self.records.lock().contains_key(event_id))
    }

    async fn reserve(
        &self,
        event_id: &EventId,
        event_type: &str,
        payload: &str,
    ) -> LedgerResult<Reservation> {
        let mut records = self.records.lock();
        if let Some(existing) = records.get(event_id) {
            return Ok(Reservation::AlreadyRecorded(existing.processing_status));
        }

        let now = Utc::now();
        records.insert(
            event_id.clone(),
            WebhookEventRecord {
                event_id: event_id.clone(),
                event_type: event_type.to_string(),
                payload: payload.to_string(),
                processing_status: ProcessingStatus::Processing,
                error_message: None,
                outcome: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(Reservation::Acquired)
    }

    async fn record(
        &self,
        event_id: &EventId,
        event_type: &str,
        payload: &str,
        completion: Completion,
    ) -> LedgerResult<()> {
        let now = Utc::now();
        let mut records = self.records.lock();

        match records.get_mut(event_id) {
            Some(existing) if existing.processing_status.is_terminal() => {
                debug!(
                    event_id = %event_id,
                    status = existing.processing_status.as_str(),
                    "Ledger record already terminal, leaving it unchanged"
                );
            }
            Some(existing) => {
                existing.processing_status = completion.status;
                existing.error_message = completion.error_message;
                existing.outcome = completion.outcome;
                existing.updated_at = now;
            }
            None => {
                records.insert(
                    event_id.clone(),
                    WebhookEventRecord {
                        event_id: event_id.clone(),
                        event_type: event_type.to_string(),
                        payload: payload.to_string(),
                        processing_status: completion.status,
                        error_message: completion.error_message,
                        outcome: completion.outcome,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }

        Ok(())
    }

    async fn get(&self, event_id: &EventId) -> LedgerResult<Option<WebhookEventRecord>> {
        Ok(self.records.lock().get(event_id).cloned())
    }

    async fn reopen_failed(&self, event_id: &EventId) -> LedgerResult<bool> {
        let mut records = self.records.lock();
        match records.get_mut(event_id) {
            Some(record) if record.processing_status == ProcessingStatus::Failed => {
                record.processing_status = ProcessingStatus::Processing;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reopen_stale(&self, event_id: &EventId, older_than: Duration) -> LedgerResult<bool> {
        let now = Utc::now();
        // A lease too large to represent never expires.
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
        else {
            return Ok(false);
        };
        let mut records = self.records.lock();
        match records.get_mut(event_id) {
            Some(record)
                if record.processing_status == ProcessingStatus::Processing
                    && record.updated_at <= cutoff =>
            {
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
