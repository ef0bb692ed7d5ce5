//! sleet: A concurrent loader for installed-apps log batches.
//!
//! This library provides components for reading gzip-compressed TSV log
//! files, decoding per-device records, and fanning them out to
//! per-device-type memcached stores with bounded retry and per-file
//! outcome accounting.
//!
//! # Example
//!
//! ```ignore
//! use sleet::{Config, run_pipeline, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let stats = run_pipeline(config).await?;
//!     println!("Delivered {} records", stats.records_delivered);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod sink;
pub mod source;
pub mod stats;

// Re-export main types
pub use config::Config;
pub use pipeline::{Pipeline, PipelineStats, run_pipeline};
pub use record::Record;
