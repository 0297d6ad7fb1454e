//! Webhook Metrics
//!
//! Lock-free outcome counters for the ingestion pipeline, an HdrHistogram of
//! processing latency, and a Prometheus text export served on `/metrics`.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use storefront_webhooks::metrics::WebhookMetrics;
//! use storefront_webhooks::webhook::ProcessingStatus;
//!
//! let metrics = WebhookMetrics::new();
//! metrics.record_received();
//! metrics.record_completed(
//!     "charge.success",
//!     ProcessingStatus::Processed,
//!     Duration::from_millis(12),
//! );
//!
//! let output = metrics.to_prometheus_format();
//! assert!(output.contains("storefront_webhooks_processed_total 1"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::webhook::ProcessingStatus;

const PREFIX: &str = "storefront_webhooks";

// ============================================================================
// Latency Histogram
// ============================================================================

/// Latency percentile summary, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// 50th percentile
    pub p50_ms: f64,
    /// 95th percentile
    pub p95_ms: f64,
    /// 99th percentile
    pub p99_ms: f64,
    /// Number of samples
    pub samples: u64,
    /// Mean
    pub mean_ms: f64,
    /// Maximum
    pub max_ms: f64,
}

/// Thread-safe latency histogram.
///
/// Tracks 1us to 60s with 3 significant figures.
#[derive(Debug)]
pub struct LatencyHistogram {
    inner: RwLock<Histogram<u64>>,
}

impl LatencyHistogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, 60_000_000, 3).expect("Failed to create histogram");
        Self {
            inner: RwLock::new(histogram),
        }
    }

    /// Record a latency in microseconds; out-of-range values are dropped
    pub fn record(&self, latency_us: u64) {
        let _ = self.inner.write().record(latency_us.max(1));
    }

    /// Record a latency duration
    pub fn record_duration(&self, duration: Duration) {
        self.record(duration.as_micros() as u64);
    }

    /// Number of samples
    pub fn count(&self) -> u64 {
        self.inner.read().len()
    }

    /// Percentile summary in milliseconds
    pub fn metrics(&self) -> LatencyMetrics {
        let hist = self.inner.read();
        if hist.is_empty() {
            return LatencyMetrics::default();
        }
        LatencyMetrics {
            p50_ms: hist.value_at_percentile(50.0) as f64 / 1000.0,
            p95_ms: hist.value_at_percentile(95.0) as f64 / 1000.0,
            p99_ms: hist.value_at_percentile(99.0) as f64 / 1000.0,
            samples: hist.len(),
            mean_ms: hist.mean() / 1000.0,
            max_ms: hist.max() as f64 / 1000.0,
        }
    }

    /// Clear all samples
    pub fn reset(&self) {
        self.inner.write().reset();
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Counters
// ============================================================================

/// Outcome counters for the webhook pipeline
#[derive(Debug, Default)]
pub struct WebhookMetrics {
    received: AtomicU64,
    rejected_malformed: AtomicU64,
    rejected_signature: AtomicU64,
    duplicates: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    timeouts: AtomicU64,
    ledger_errors: AtomicU64,
    in_flight: AtomicU64,
    processing_latency: LatencyHistogram,
    events_by_type: RwLock<HashMap<String, u64>>,
}

/// Point-in-time copy of [`WebhookMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Requests reaching the receiver
    pub received: u64,
    /// Bodies that were not a JSON object
    pub rejected_malformed: u64,
    /// Failed signature checks
    pub rejected_signature: u64,
    /// Deliveries short-circuited by the ledger
    pub duplicates: u64,
    /// Events ending `processed`
    pub processed: u64,
    /// Events ending `failed`
    pub failed: u64,
    /// Events ending `skipped`
    pub skipped: u64,
    /// Deliveries acknowledged before processing finished
    pub timeouts: u64,
    /// Ledger operations that returned an error
    pub ledger_errors: u64,
    /// Events currently being processed
    pub in_flight: u64,
    /// Completed events per event type
    pub events_by_type: BTreeMap<String, u64>,
    /// Validation plus dispatch latency
    pub processing_latency: LatencyMetrics,
}

impl WebhookMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// A request reached the receiver
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Body rejected as malformed
    pub fn record_malformed(&self) {
        self.rejected_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Signature check failed
    pub fn record_unauthenticated(&self) {
        self.rejected_signature.fetch_add(1, Ordering::Relaxed);
    }

    /// Ledger already held the event
    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// Processing outlived the timeout
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A ledger call failed
    pub fn record_ledger_error(&self) {
        self.ledger_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Processing started
    pub fn processing_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Processing finished with a terminal status
    pub fn record_completed(&self, event_type: &str, status: ProcessingStatus, elapsed: Duration) {
        let counter = match status {
            ProcessingStatus::Processed => &self.processed,
            ProcessingStatus::Failed => &self.failed,
            ProcessingStatus::Skipped => &self.skipped,
            ProcessingStatus::Processing => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.processing_latency.record_duration(elapsed);
        *self
            .events_by_type
            .write()
            .entry(event_type.to_string())
            .or_insert(0) += 1;
    }

    /// Processing finished; saturates at zero
    pub fn processing_finished(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Current number of events being processed
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Copy every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected_malformed: self.rejected_malformed.load(Ordering::Relaxed),
            rejected_signature: self.rejected_signature.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            ledger_errors: self.ledger_errors.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            events_by_type: self
                .events_by_type
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            processing_latency: self.processing_latency.metrics(),
        }
    }

    /// Prometheus text exposition
    pub fn to_prometheus_format(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        let counters = [
            ("received_total", "Webhook requests received", snapshot.received),
            ("rejected_malformed_total", "Malformed bodies", snapshot.rejected_malformed),
            ("rejected_signature_total", "Failed signatures", snapshot.rejected_signature),
            ("duplicates_total", "Ledger short-circuits", snapshot.duplicates),
            ("processed_total", "Events processed", snapshot.processed),
            ("failed_total", "Events whose handler failed", snapshot.failed),
            ("skipped_total", "Events skipped", snapshot.skipped),
            ("timeouts_total", "Acks sent before processing ended", snapshot.timeouts),
            ("ledger_errors_total", "Ledger operations that failed", snapshot.ledger_errors),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {PREFIX}_{name} {help}");
            let _ = writeln!(output, "# TYPE {PREFIX}_{name} counter");
            let _ = writeln!(output, "{PREFIX}_{name} {value}");
        }

        let _ = writeln!(output, "# TYPE {PREFIX}_in_flight gauge");
        let _ = writeln!(output, "{PREFIX}_in_flight {}", snapshot.in_flight);

        if !snapshot.events_by_type.is_empty() {
            let _ = writeln!(output, "# TYPE {PREFIX}_events_total counter");
            for (event_type, count) in &snapshot.events_by_type {
                let label = event_type.replace('\\', "\\\\").replace('"', "\\\"");
                let _ = writeln!(
                    output,
                    "{PREFIX}_events_total{{event_type=\"{label}\"}} {count}"
                );
            }
        }

        let latency = &snapshot.processing_latency;
        if latency.samples > 0 {
            let _ = writeln!(output, "{PREFIX}_processing_duration_p50_ms {}", latency.p50_ms);
            let _ = writeln!(output, "{PREFIX}_processing_duration_p95_ms {}", latency.p95_ms);
            let _ = writeln!(output, "{PREFIX}_processing_duration_p99_ms {}", latency.p99_ms);
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_outcome_counters() {
        let metrics = WebhookMetrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_malformed();
        metrics.record_unauthenticated();
        metrics.record_duplicate();
        let ms = Duration::from_millis;
        metrics.record_completed("charge.success", ProcessingStatus::Processed, ms(5));
        metrics.record_completed("transfer.success", ProcessingStatus::Skipped, ms(1));
        metrics.record_completed("charge.success", ProcessingStatus::Failed, ms(9));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.rejected_malformed, 1);
        assert_eq!(snapshot.rejected_signature, 1);
        assert_eq!(snapshot.duplicates, 1);
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.events_by_type.get("charge.success"), Some(&2));
        assert_eq!(snapshot.processing_latency.samples, 3);
    }

    #[test]
    fn test_processing_status_is_not_terminal_count() {
        let metrics = WebhookMetrics::new();
        metrics.record_completed("x", ProcessingStatus::Processing, Duration::from_millis(1));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.processed + snapshot.failed + snapshot.skipped, 0);
        assert!(snapshot.events_by_type.is_empty());
    }

    #[test]
    fn test_in_flight_saturates() {
        let metrics = WebhookMetrics::new();
        metrics.processing_started();
        metrics.processing_finished();
        metrics.processing_finished();
        assert_eq!(metrics.in_flight(), 0);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = WebhookMetrics::new();
        metrics.record_received();
        metrics.record_completed(
            "charge.success",
            ProcessingStatus::Processed,
            Duration::from_millis(3),
        );

        let output = metrics.to_prometheus_format();
        assert!(output.contains("# TYPE storefront_webhooks_received_total counter"));
        assert!(output.contains("storefront_webhooks_received_total 1"));
        assert!(output
            .contains("storefront_webhooks_events_total{event_type=\"charge.success\"} 1"));
        assert!(output.contains("storefront_webhooks_processing_duration_p50_ms"));
    }

    #[test]
    fn test_latency_histogram() {
        let histogram = LatencyHistogram::new();
        assert_eq!(histogram.metrics(), LatencyMetrics::default());

        for us in [1000, 2000, 5000, 10000, 50000] {
            histogram.record(us);
        }
        assert_eq!(histogram.count(), 5);

        let metrics = histogram.metrics();
        assert!(metrics.p50_ms > 0.0);
        assert!(metrics.p95_ms >= metrics.p50_ms);
        assert!(metrics.p99_ms >= metrics.p95_ms);
        // HdrHistogram buckets lose a little precision at the top
        assert!((50.0..=51.0).contains(&metrics.max_ms));

        histogram.reset();
        assert_eq!(histogram.count(), 0);
    }

    #[test]
    fn test_concurrent_recording() {
        use std::thread;

        let metrics = Arc::new(WebhookMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..500 {
                        metrics.record_received();
                        metrics.processing_started();
                        metrics.record_completed(
                            "charge.success",
                            ProcessingStatus::Processed,
                            Duration::from_micros(200),
                        );
                        metrics.processing_finished();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 4000);
        assert_eq!(snapshot.processed, 4000);
        assert_eq!(snapshot.in_flight, 0);
    }
}
