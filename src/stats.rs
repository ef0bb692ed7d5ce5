//! Shared delivery accounting.
//!
//! Two pieces cooperate to let a file's worker read an authoritative
//! failure count after scanning:
//!
//! - [`DeliveryStats`]: a registry of terminal delivery failures keyed by
//!   source file. Sink writers record into it; each file's worker drains
//!   its own entry exactly once.
//! - [`DeliveryTracker`]: a per-file outstanding-delivery counter. The
//!   worker registers every record it enqueues; a sink writer resolves each
//!   one after delivery succeeds or exhausts its retries. The worker waits
//!   for the count to reach zero before touching the registry, so a failure
//!   can never race past the reconciliation read.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Registry of terminal delivery failures, keyed by source file.
///
/// A single lock is enough at this scale; entries are created implicitly on
/// first failure and removed when the owning worker reconciles.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    failures: Mutex<HashMap<String, usize>>,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one terminal delivery failure for `file`.
    pub fn record_failure(&self, file: &str) {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *failures.entry(file.to_string()).or_insert(0) += 1;
    }

    /// Remove and return the failure count for `file`, 0 if absent.
    ///
    /// Ordering against concurrent [`record_failure`] calls for the same
    /// file is the caller's responsibility: wait on the file's
    /// [`DeliveryTracker`] first.
    ///
    /// [`record_failure`]: DeliveryStats::record_failure
    pub fn take_and_clear(&self, file: &str) -> usize {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        failures.remove(file).unwrap_or(0)
    }
}

/// Outstanding-delivery counter for one source file.
///
/// The owning worker calls [`register`] before every enqueue and
/// [`wait_drained`] after scanning; sink writers call [`resolve`] once per
/// delivery after it succeeds or terminally fails.
///
/// [`register`]: DeliveryTracker::register
/// [`resolve`]: DeliveryTracker::resolve
/// [`wait_drained`]: DeliveryTracker::wait_drained
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    outstanding: AtomicUsize,
    drained: Notify,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one delivery as in flight. Called by the worker before `send`.
    pub fn register(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Mark one delivery as resolved (success or terminal failure).
    ///
    /// Any registry update for this delivery must happen before the call.
    pub fn resolve(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            // notify_one stores a permit if the worker is not waiting yet
            self.drained.notify_one();
        }
    }

    /// Current number of unresolved deliveries.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Wait until every registered delivery has been resolved.
    ///
    /// Must only be called after the last `register` (i.e. after scanning),
    /// otherwise a transient zero could release the waiter early.
    pub async fn wait_drained(&self) {
        loop {
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            self.drained.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_record_and_take() {
        let stats = DeliveryStats::new();
        stats.record_failure("a.tsv.gz");
        stats.record_failure("a.tsv.gz");
        stats.record_failure("b.tsv.gz");

        assert_eq!(stats.take_and_clear("a.tsv.gz"), 2);
        // consumed exactly once
        assert_eq!(stats.take_and_clear("a.tsv.gz"), 0);
        assert_eq!(stats.take_and_clear("b.tsv.gz"), 1);
    }

    #[test]
    fn test_take_absent_is_zero() {
        let stats = DeliveryStats::new();
        assert_eq!(stats.take_and_clear("never-seen"), 0);
    }

    #[test]
    fn test_concurrent_record_failure() {
        let stats = Arc::new(DeliveryStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        stats.record_failure("f");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.take_and_clear("f"), 800);
    }

    #[tokio::test]
    async fn test_wait_drained_returns_immediately_when_nothing_registered() {
        let tracker = DeliveryTracker::new();
        tracker.wait_drained().await;
    }

    #[tokio::test]
    async fn test_wait_drained_blocks_until_resolution() {
        let tracker = Arc::new(DeliveryTracker::new());
        tracker.register();
        tracker.register();

        let resolver = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                tracker.resolve();
                tokio::time::sleep(Duration::from_millis(20)).await;
                tracker.resolve();
            })
        };

        tracker.wait_drained().await;
        assert_eq!(tracker.outstanding(), 0);
        resolver.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_drained_after_resolution_already_done() {
        let tracker = DeliveryTracker::new();
        tracker.register();
        tracker.resolve();
        // permit was stored; must not hang
        tracker.wait_drained().await;
    }
}
