//! Per-destination delivery task.

use snafu::ResultExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::emit;
use crate::error::{PipelineError, StoreError, TaskJoinSnafu};
use crate::metrics::events::{DeliveryCompleted, DeliveryFailed, DeliveryRetried};
use crate::sink::codec;
use crate::sink::memcache::{Store, StoreRef};
use crate::sink::Delivery;
use crate::stats::DeliveryStats;

/// Retry policy for one destination's writer.
#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    /// Delivery attempts per record (validated to be at least 1).
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

/// Counters returned by a writer when its queue is closed and drained.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterStats {
    pub delivered: usize,
    pub failed: usize,
}

/// Handle to one destination's background writer task.
///
/// Created with [`spawn`]; the queue's write end is cloned out of `tx` to
/// every ingestion worker. [`finish`] drops this handle's sender and waits
/// for the task, which exits once the queue is closed and empty.
///
/// [`spawn`]: SinkWriter::spawn
/// [`finish`]: SinkWriter::finish
pub struct SinkWriter {
    pub tx: mpsc::Sender<Delivery>,
    handle: JoinHandle<WriterStats>,
}

impl SinkWriter {
    /// Spawn the writer task for `destination` with a queue of `capacity`.
    pub fn spawn(
        destination: String,
        store: StoreRef,
        stats: Arc<DeliveryStats>,
        config: WriterConfig,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(Self::run(destination, rx, store, stats, config));
        Self { tx, handle }
    }

    /// Close this handle's sender and wait for the writer to drain.
    ///
    /// All worker-held clones of the sender must already be dropped,
    /// otherwise the queue stays open and this call waits for them.
    pub async fn finish(self) -> Result<WriterStats, PipelineError> {
        drop(self.tx);
        self.handle.await.context(TaskJoinSnafu)
    }

    /// Consume deliveries until the queue is closed and empty.
    ///
    /// Suspends only on an empty queue and on the inter-attempt retry
    /// delay. A terminal delivery failure is absorbed into the per-file
    /// accounting, never escalated.
    async fn run(
        destination: String,
        mut rx: mpsc::Receiver<Delivery>,
        store: StoreRef,
        stats: Arc<DeliveryStats>,
        config: WriterConfig,
    ) -> WriterStats {
        let mut totals = WriterStats::default();

        while let Some(delivery) = rx.recv().await {
            let key = delivery.record.key();
            let value = codec::encode_value(&delivery.record);

            match deliver_with_retry(&*store, &key, &value, &destination, config).await {
                Ok(attempts) => {
                    totals.delivered += 1;
                    emit!(DeliveryCompleted {
                        destination: destination.clone(),
                    });
                    debug!(
                        destination = %destination,
                        key = %key,
                        attempts,
                        "set ok"
                    );
                }
                Err(err) => {
                    totals.failed += 1;
                    // registry update must precede resolution so the owning
                    // worker's reconciliation read observes it
                    stats.record_failure(&delivery.record.source_file);
                    emit!(DeliveryFailed {
                        destination: destination.clone(),
                    });
                    warn!(
                        destination = %destination,
                        key = %key,
                        file = %delivery.record.source_file,
                        "sending failed: {err}"
                    );
                }
            }

            delivery.tracker.resolve();
        }

        info!(
            destination = %destination,
            delivered = totals.delivered,
            failed = totals.failed,
            "writer drained"
        );
        totals
    }
}

/// Attempt delivery up to `config.max_retries` times, stopping on the first
/// success. Returns the number of attempts used.
async fn deliver_with_retry(
    store: &dyn Store,
    key: &str,
    value: &[u8],
    destination: &str,
    config: WriterConfig,
) -> Result<u32, StoreError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match store.set(key, value).await {
            Ok(()) => return Ok(attempt),
            Err(err) if attempt < config.max_retries => {
                emit!(DeliveryRetried {
                    destination: destination.to_string(),
                });
                debug!(key = %key, attempt, "retrying delivery: {err}");
                tokio::time::sleep(config.retry_delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::decode_line;
    use crate::stats::DeliveryTracker;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that fails the first `failures` calls, then succeeds.
    struct FlakyStore {
        failures: usize,
        calls: AtomicUsize,
        stored: Mutex<Vec<String>>,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                stored: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn set(&self, key: &str, _value: &[u8]) -> Result<(), StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(StoreError::Timeout { millis: 1 });
            }
            self.stored.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    fn test_config() -> WriterConfig {
        WriterConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn delivery(line: &str, file: &str, tracker: &Arc<DeliveryTracker>) -> Delivery {
        tracker.register();
        Delivery {
            record: decode_line(line, file).unwrap(),
            tracker: tracker.clone(),
        }
    }

    #[tokio::test]
    async fn test_success_on_last_attempt_records_no_failure() {
        let store = Arc::new(FlakyStore::new(2));
        let stats = Arc::new(DeliveryStats::new());
        let tracker = Arc::new(DeliveryTracker::new());
        let writer = SinkWriter::spawn(
            "idfa".to_string(),
            store.clone(),
            stats.clone(),
            test_config(),
            4,
        );

        writer
            .tx
            .send(delivery("idfa\tdev\t1\t2\t3", "a.tsv.gz", &tracker))
            .await
            .unwrap();

        let totals = writer.finish().await.unwrap();
        assert_eq!(totals.delivered, 1);
        assert_eq!(totals.failed, 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.take_and_clear("a.tsv.gz"), 0);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_record_one_failure() {
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let stats = Arc::new(DeliveryStats::new());
        let tracker = Arc::new(DeliveryTracker::new());
        let writer = SinkWriter::spawn(
            "idfa".to_string(),
            store.clone(),
            stats.clone(),
            test_config(),
            4,
        );

        writer
            .tx
            .send(delivery("idfa\tdev\t1\t2\t3", "a.tsv.gz", &tracker))
            .await
            .unwrap();

        // the tracker resolving proves the registry update already happened
        tracker.wait_drained().await;
        assert_eq!(stats.take_and_clear("a.tsv.gz"), 1);

        let totals = writer.finish().await.unwrap();
        assert_eq!(totals.delivered, 0);
        assert_eq!(totals.failed, 1);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_queue_preserves_order() {
        let store = Arc::new(FlakyStore::new(0));
        let stats = Arc::new(DeliveryStats::new());
        let tracker = Arc::new(DeliveryTracker::new());
        let writer = SinkWriter::spawn(
            "gaid".to_string(),
            store.clone(),
            stats.clone(),
            test_config(),
            8,
        );

        for id in ["a", "b", "c"] {
            writer
                .tx
                .send(delivery(
                    &format!("gaid\t{id}\t1\t2\t3"),
                    "f.tsv.gz",
                    &tracker,
                ))
                .await
                .unwrap();
        }

        writer.finish().await.unwrap();
        let stored = store.stored.lock().unwrap().clone();
        assert_eq!(stored, vec!["gaid:a", "gaid:b", "gaid:c"]);
    }
}
