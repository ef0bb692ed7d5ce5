//! Error types for sleet using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;
use std::path::PathBuf;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Source pattern is empty.
    #[snafu(display("Source pattern cannot be empty"))]
    EmptyPattern,

    /// No destinations configured.
    #[snafu(display("At least one destination must be configured"))]
    NoDestinations,

    /// Destination address is empty.
    #[snafu(display("Destination '{destination}' has an empty address"))]
    EmptyAddress { destination: String },

    /// Retry count must allow at least one attempt.
    #[snafu(display("max_retries must be at least 1"))]
    ZeroRetries,

    /// Error-rate threshold outside the meaningful range.
    #[snafu(display("normal_error_rate must be within (0, 1], got {value}"))]
    ErrorRateRange { value: f64 },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },

    /// The glob pattern could not be compiled.
    #[snafu(display("Invalid glob pattern: {pattern}"))]
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },
}

// ============ Decode Errors ============

/// Errors produced by the record decoder. Always per-line, never fatal.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DecodeError {
    /// Line does not have the expected field layout.
    #[snafu(display("Malformed record: {reason}"))]
    MalformedRecord { reason: String },
}

// ============ Ingest Errors ============

/// Errors that abort a single file's worker (other files continue).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    /// Failed to read the input file.
    #[snafu(display("Failed to read {}", path.display()))]
    ReadSource {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Gzip decompression failed.
    #[snafu(display("Gzip decompression failed for {}", path.display()))]
    Decompress {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The decompression task was cancelled or panicked.
    #[snafu(display("Decompression task failed for {}", path.display()))]
    DecompressJoin {
        path: PathBuf,
        source: tokio::task::JoinError,
    },
}

// ============ Store Errors ============

/// Errors from the destination key-value store client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// TCP connect to the store failed.
    #[snafu(display("Failed to connect to {addr}"))]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// I/O error while talking to the store.
    #[snafu(display("Store I/O error"))]
    Io { source: std::io::Error },

    /// The store did not acknowledge the write.
    #[snafu(display("Store rejected write: {response}"))]
    NotStored { response: String },

    /// Key violates memcached key rules (length, whitespace, control bytes).
    #[snafu(display("Invalid key: {key}"))]
    InvalidKey { key: String },

    /// The attempt exceeded the configured timeout.
    #[snafu(display("Store operation timed out after {millis}ms"))]
    Timeout { millis: u64 },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Input discovery failed (unreadable source directory).
    #[snafu(display("Failed to list source directory {}", dir.display()))]
    ListSource {
        dir: PathBuf,
        source: std::io::Error,
    },

    /// Task join error.
    #[snafu(display("Task join error"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Failed to open the requested log file.
    #[snafu(display("Failed to open log file {}", path.display()))]
    OpenLogFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}
