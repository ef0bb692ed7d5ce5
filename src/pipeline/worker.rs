//! Per-file ingestion worker.
//!
//! Each input file gets its own task: decompress and scan, decode every
//! line, route records to their destination queues, then reconcile decode
//! errors with delivery failures and archive the file.
//!
//! The worker owns all of its counters except the delivery-failure count,
//! which sink writers accumulate in the shared registry. Reconciliation
//! waits on the file's outstanding-delivery tracker, so the registry read
//! happens strictly after every delivery for this file has been resolved.
//! Scanning finishing first proves nothing, because the queues sit between
//! scanning and delivery.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::emit;
use crate::error::IngestError;
use crate::metrics::events::{DecodeFailed, FileProcessed, FileStatus, RecordsDecoded};
use crate::record::decode_line;
use crate::sink::Delivery;
use crate::source;
use crate::stats::{DeliveryStats, DeliveryTracker};

/// Destination type -> queue write end.
pub type Routes = HashMap<String, mpsc::Sender<Delivery>>;

/// Final verdict for one input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Error rate below the configured threshold.
    Success,
    /// Loaded, but the error rate reached the threshold.
    HighErrorRate,
    /// Nothing was delivered successfully.
    AllErrors,
}

impl Disposition {
    fn status(self) -> FileStatus {
        match self {
            Disposition::Success => FileStatus::Success,
            Disposition::HighErrorRate => FileStatus::HighErrorRate,
            Disposition::AllErrors => FileStatus::AllErrors,
        }
    }
}

/// Outcome of one file, handed back to the orchestrator.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub decoded: usize,
    pub decode_errors: usize,
    pub delivery_failures: usize,
    pub disposition: Disposition,
}

/// Derive a file's disposition from its reconciled counters.
///
/// `adjusted = decoded - delivery_failures` is the number of records that
/// actually reached a store. With nothing delivered the file failed
/// outright; otherwise the rate of all errors (decode + delivery) against
/// the adjusted count decides.
pub fn reconcile(
    decoded: usize,
    decode_errors: usize,
    delivery_failures: usize,
    normal_error_rate: f64,
) -> Disposition {
    let adjusted = decoded.saturating_sub(delivery_failures);
    if adjusted == 0 {
        return Disposition::AllErrors;
    }
    let error_rate = (decode_errors + delivery_failures) as f64 / adjusted as f64;
    if error_rate < normal_error_rate {
        Disposition::Success
    } else {
        Disposition::HighErrorRate
    }
}

/// Ingest one file end to end.
///
/// Per-line problems never abort the file; only an open/decompress failure
/// does, and that error aborts this worker alone.
pub async fn ingest_file(
    path: PathBuf,
    routes: Arc<Routes>,
    stats: Arc<DeliveryStats>,
    normal_error_rate: f64,
) -> Result<FileReport, IngestError> {
    let file_key = path.to_string_lossy().into_owned();
    debug!(file = %file_key, "starting ingestion");

    // Opening
    let lines = source::read_lines(&path).await?;

    // Scanning
    let tracker = Arc::new(DeliveryTracker::new());
    let mut decoded = 0usize;
    let mut decode_errors = 0usize;

    for line in &lines {
        let record = match decode_line(line, &file_key) {
            Ok(record) => record,
            Err(err) => {
                decode_errors += 1;
                emit!(DecodeFailed);
                debug!(file = %file_key, "{err}");
                continue;
            }
        };

        let Some(queue) = routes.get(&record.dest_type) else {
            decode_errors += 1;
            emit!(DecodeFailed);
            debug!(
                file = %file_key,
                dest_type = %record.dest_type,
                "no destination configured for record"
            );
            continue;
        };

        decoded += 1;
        tracker.register();
        let delivery = Delivery {
            record,
            tracker: tracker.clone(),
        };
        // blocking send: a slow writer throttles every worker feeding it
        if let Err(returned) = queue.send(delivery).await {
            // queue closed underneath us; resolve the registration ourselves
            stats.record_failure(&file_key);
            returned.0.tracker.resolve();
            warn!(file = %file_key, "destination queue closed during scan");
        }
    }
    emit!(RecordsDecoded {
        count: decoded as u64,
    });

    // Reconciling: only once nothing for this file is in flight is the
    // registry entry authoritative
    tracker.wait_drained().await;
    let delivery_failures = stats.take_and_clear(&file_key);

    let disposition = reconcile(decoded, decode_errors, delivery_failures, normal_error_rate);
    let total_errors = decode_errors + delivery_failures;
    match disposition {
        Disposition::Success => info!(
            file = %file_key,
            errors = total_errors,
            delivered = decoded.saturating_sub(delivery_failures),
            "Acceptable error rate, successful load"
        ),
        Disposition::HighErrorRate => warn!(
            file = %file_key,
            errors = total_errors,
            delivered = decoded.saturating_sub(delivery_failures),
            threshold = normal_error_rate,
            "High error rate, failed load"
        ),
        Disposition::AllErrors => warn!(file = %file_key, "All errors, failed load"),
    }
    emit!(FileProcessed {
        status: disposition.status(),
    });

    // Archiving: disposition affects the diagnostic, not the rename
    match source::archive_file(&path).await {
        Ok(archived) => debug!(file = %file_key, archived = %archived.display(), "archived"),
        Err(err) => warn!(file = %file_key, "failed to archive: {err}"),
    }

    Ok(FileReport {
        path,
        decoded,
        decode_errors,
        delivery_failures,
        disposition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::path::Path;

    fn write_gz(path: &Path, content: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    /// Queue consumer standing in for a sink writer that always succeeds.
    fn spawn_resolver(capacity: usize) -> (mpsc::Sender<Delivery>, tokio::task::JoinHandle<usize>) {
        let (tx, mut rx) = mpsc::channel::<Delivery>(capacity);
        let handle = tokio::spawn(async move {
            let mut seen = 0;
            while let Some(delivery) = rx.recv().await {
                seen += 1;
                delivery.tracker.resolve();
            }
            seen
        });
        (tx, handle)
    }

    #[test]
    fn test_reconcile_threshold_boundary() {
        // 2 errors / 200 delivered = exactly the 0.01 threshold: not below
        assert_eq!(reconcile(200, 2, 0, 0.01), Disposition::HighErrorRate);
        // 1 error / 200 delivered = 0.005 < 0.01
        assert_eq!(reconcile(200, 1, 0, 0.01), Disposition::Success);
    }

    #[test]
    fn test_reconcile_counts_delivery_failures_twice_over() {
        // a delivery failure both adds an error and removes a success
        assert_eq!(reconcile(200, 0, 2, 0.01), Disposition::HighErrorRate);
        assert_eq!(reconcile(1000, 0, 2, 0.01), Disposition::Success);
    }

    #[test]
    fn test_reconcile_nothing_delivered() {
        assert_eq!(reconcile(0, 5, 0, 0.01), Disposition::AllErrors);
        assert_eq!(reconcile(3, 0, 3, 0.01), Disposition::AllErrors);
        // empty file counts as all-errors too
        assert_eq!(reconcile(0, 0, 0, 0.01), Disposition::AllErrors);
    }

    #[tokio::test]
    async fn test_all_lines_malformed_attempts_no_deliveries() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.tsv.gz");
        write_gz(&path, "garbage\nmore garbage\n\t\t\t\t\n");

        let (tx, consumer) = spawn_resolver(4);
        let routes = Arc::new(HashMap::from([("idfa".to_string(), tx)]));
        let stats = Arc::new(DeliveryStats::new());

        let report = ingest_file(path, routes.clone(), stats, 0.01).await.unwrap();

        assert_eq!(report.disposition, Disposition::AllErrors);
        assert_eq!(report.decoded, 0);
        assert_eq!(report.decode_errors, 3);

        drop(routes);
        assert_eq!(consumer.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_destination_counts_as_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mixed.tsv.gz");
        write_gz(
            &path,
            "idfa\ta\t1\t2\t3\nwimp\tb\t1\t2\t3\nidfa\tc\t1\t2\t3\n",
        );

        let (tx, consumer) = spawn_resolver(4);
        let routes = Arc::new(HashMap::from([("idfa".to_string(), tx)]));
        let stats = Arc::new(DeliveryStats::new());

        let report = ingest_file(path, routes.clone(), stats, 0.01).await.unwrap();

        assert_eq!(report.decoded, 2);
        assert_eq!(report.decode_errors, 1);
        drop(routes);
        assert_eq!(consumer.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_file_archived_regardless_of_disposition() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.tsv.gz");
        write_gz(&path, "garbage\n");

        let (tx, _consumer) = spawn_resolver(4);
        let routes = Arc::new(HashMap::from([("idfa".to_string(), tx)]));
        let stats = Arc::new(DeliveryStats::new());

        let report = ingest_file(path.clone(), routes, stats, 0.01).await.unwrap();

        assert_eq!(report.disposition, Disposition::AllErrors);
        assert!(!path.exists());
        assert!(dir.path().join(".bad.tsv.gz").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal_for_this_worker_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gone.tsv.gz");

        let (tx, _consumer) = spawn_resolver(4);
        let routes = Arc::new(HashMap::from([("idfa".to_string(), tx)]));
        let stats = Arc::new(DeliveryStats::new());

        let err = ingest_file(path, routes, stats, 0.01).await.unwrap_err();
        assert!(matches!(err, IngestError::ReadSource { .. }));
    }
}
