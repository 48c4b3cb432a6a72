//! Pending batch of reportable failures
//!
//! This module provides the PendingBatch which accumulates failure records
//! between flushes. Appends and drains are serialised by a single mutex, so a
//! drain always returns exactly the records appended before it, in order.

use crate::events::FailureRecord;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Append-only collection of failure records for the current window
#[derive(Debug, Default)]
pub struct PendingBatch {
    records: Mutex<Vec<FailureRecord>>,
}

impl PendingBatch {
    /// Create an empty batch
    ///
    /// # Examples
    ///
    /// ```
    /// use failmail::aggregator::PendingBatch;
    ///
    /// let batch = PendingBatch::new();
    /// assert!(batch.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to the current window
    ///
    /// # Returns
    ///
    /// Number of records pending after the append
    pub fn ingest(&self, record: FailureRecord) -> usize {
        let mut records = self.lock();
        records.push(record);
        records.len()
    }

    /// Detach everything accumulated so far and start a fresh window
    ///
    /// Records come back oldest first. An empty vector means the window saw
    /// no failures.
    pub fn drain(&self) -> Vec<FailureRecord> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock can't leave the Vec half-written, so the
    // records are still good after poisoning.
    fn lock(&self) -> MutexGuard<'_, Vec<FailureRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use std::thread;

    fn create_test_record(message: &str) -> FailureRecord {
        FailureRecord {
            occurred_at: Utc::now(),
            message: message.to_string(),
            stack_trace: format!("{}\n    at test", message),
            context: None,
            server: None,
        }
    }

    #[test]
    fn test_ingest_and_drain() {
        let batch = PendingBatch::new();

        assert_eq!(batch.ingest(create_test_record("A")), 1);
        assert_eq!(batch.ingest(create_test_record("B")), 2);
        assert_eq!(batch.len(), 2);

        let drained = batch.drain();
        let messages: Vec<&str> = drained.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["A", "B"]);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_drain_empty() {
        let batch = PendingBatch::new();
        assert!(batch.drain().is_empty());
    }

    #[test]
    fn test_records_not_duplicated_across_drains() {
        let batch = PendingBatch::new();

        batch.ingest(create_test_record("first window"));
        let first = batch.drain();

        batch.ingest(create_test_record("second window"));
        let second = batch.drain();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].message, "first window");
        assert_eq!(second[0].message, "second window");
    }

    #[test]
    fn test_concurrent_ingest_with_drains() {
        let batch = Arc::new(PendingBatch::new());
        let producers = 8;
        let per_producer = 250;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let batch = Arc::clone(&batch);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        batch.ingest(create_test_record(&format!("{}-{}", p, i)));
                    }
                })
            })
            .collect();

        // Drain while producers are still running
        let mut collected = Vec::new();
        for _ in 0..20 {
            collected.extend(batch.drain());
            thread::yield_now();
        }

        for handle in handles {
            handle.join().unwrap();
        }
        collected.extend(batch.drain());

        assert_eq!(collected.len(), producers * per_producer);

        let mut messages: Vec<String> = collected.into_iter().map(|r| r.message).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), producers * per_producer);
    }

    #[test]
    fn test_survives_poisoned_lock() {
        let batch = Arc::new(PendingBatch::new());
        batch.ingest(create_test_record("before panic"));

        let poisoner = Arc::clone(&batch);
        let result = thread::spawn(move || {
            let _guard = poisoner.records.lock().unwrap();
            panic!("poison the batch");
        })
        .join();
        assert!(result.is_err());

        batch.ingest(create_test_record("after panic"));
        let drained = batch.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].message, "after panic");
    }
}
