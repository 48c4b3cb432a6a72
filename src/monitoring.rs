//! Self-monitoring counters for the failure pipeline
//!
//! Tracks how many failures were reported or ignored, how many reports were
//! sent, and how often delivery or the flush itself went wrong.

use crate::events::{format_timestamp, Timestamp};
use chrono::Utc;
use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Counters shared by the ingestion path and the flush thread
#[derive(Debug, Default)]
pub struct PipelineStats {
    reported: AtomicU64,
    ignored: AtomicU64,
    batches_sent: AtomicU64,
    records_notified: AtomicU64,
    dispatch_failures: AtomicU64,
    pipeline_faults: AtomicU64,
    last_flush: Mutex<Option<Timestamp>>,
}

/// Point-in-time copy of the pipeline counters
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    /// Failures logged and buffered
    pub reported: u64,
    /// Failures dropped by the classifier
    pub ignored: u64,
    /// Reports accepted by the transport
    pub batches_sent: u64,
    /// Records included in accepted reports
    pub records_notified: u64,
    /// Reports the transport rejected
    pub dispatch_failures: u64,
    /// Flushes that panicked
    pub pipeline_faults: u64,
    /// When the last non-empty batch was dispatched
    pub last_flush: Option<Timestamp>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_reported(&self) {
        self.reported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a report the transport accepted
    pub fn record_sent(&self, records: usize) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.records_notified
            .fetch_add(records as u64, Ordering::Relaxed);
        self.touch_last_flush();
    }

    /// Record a report the transport rejected
    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
        self.touch_last_flush();
    }

    pub fn record_pipeline_fault(&self) {
        self.pipeline_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reported: self.reported.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            records_notified: self.records_notified.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            pipeline_faults: self.pipeline_faults.load(Ordering::Relaxed),
            last_flush: *self
                .last_flush
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn touch_last_flush(&self) {
        *self
            .last_flush
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }
}

impl StatsSnapshot {
    /// Share of dispatched reports the transport accepted, as a percentage
    ///
    /// 100 when nothing was dispatched yet.
    pub fn delivery_success_rate(&self) -> f64 {
        let attempts = self.batches_sent + self.dispatch_failures;
        if attempts == 0 {
            100.0
        } else {
            self.batches_sent as f64 / attempts as f64 * 100.0
        }
    }

    /// Write a one-line summary to the log
    pub fn log_summary(&self) {
        info!(
            "Pipeline stats: {} reported, {} ignored, {} report(s) sent with {} failure(s), \
             {} delivery failure(s) ({:.1}% delivered), {} pipeline fault(s), last flush {}",
            self.reported,
            self.ignored,
            self.batches_sent,
            self.records_notified,
            self.dispatch_failures,
            self.delivery_success_rate(),
            self.pipeline_faults,
            self.last_flush
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_else(|| "never".to_string())
        );
    }
}
