//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::{counter, gauge};
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when input files are discovered for a run.
pub struct FilesDiscovered {
    pub count: usize,
}

impl InternalEvent for FilesDiscovered {
    fn emit(self) {
        trace!(count = self.count, "Files discovered");
        gauge!("sleet_files_discovered").set(self.count as f64);
    }
}

/// Event emitted when compressed bytes are read from a source file.
pub struct BytesRead {
    pub bytes: u64,
}

impl InternalEvent for BytesRead {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes read");
        counter!("sleet_bytes_read_total").increment(self.bytes);
    }
}

/// Event emitted when lines decode into records.
pub struct RecordsDecoded {
    pub count: u64,
}

impl InternalEvent for RecordsDecoded {
    fn emit(self) {
        trace!(count = self.count, "Records decoded");
        counter!("sleet_records_decoded_total").increment(self.count);
    }
}

/// Event emitted when a line fails to decode (or names an unconfigured
/// destination).
pub struct DecodeFailed;

impl InternalEvent for DecodeFailed {
    fn emit(self) {
        trace!("Decode failed");
        counter!("sleet_decode_failures_total").increment(1);
    }
}

/// Event emitted when a delivery succeeds.
pub struct DeliveryCompleted {
    pub destination: String,
}

impl InternalEvent for DeliveryCompleted {
    fn emit(self) {
        trace!(destination = %self.destination, "Delivery completed");
        counter!("sleet_deliveries_total", "destination" => self.destination).increment(1);
    }
}

/// Event emitted for each failed attempt that will be retried.
pub struct DeliveryRetried {
    pub destination: String,
}

impl InternalEvent for DeliveryRetried {
    fn emit(self) {
        trace!(destination = %self.destination, "Delivery retried");
        counter!("sleet_delivery_retries_total", "destination" => self.destination).increment(1);
    }
}

/// Event emitted when a delivery exhausts its retries.
pub struct DeliveryFailed {
    pub destination: String,
}

impl InternalEvent for DeliveryFailed {
    fn emit(self) {
        trace!(destination = %self.destination, "Delivery failed");
        counter!("sleet_delivery_failures_total", "destination" => self.destination).increment(1);
    }
}

/// Final status of one input file.
#[derive(Debug, Clone, Copy)]
pub enum FileStatus {
    Success,
    HighErrorRate,
    AllErrors,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Success => "success",
            FileStatus::HighErrorRate => "high_error_rate",
            FileStatus::AllErrors => "all_errors",
            FileStatus::Failed => "failed",
        }
    }
}

/// Event emitted when an input file finishes processing.
pub struct FileProcessed {
    pub status: FileStatus,
}

impl InternalEvent for FileProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "File processed");
        counter!("sleet_files_processed_total", "status" => self.status.as_str()).increment(1);
    }
}
