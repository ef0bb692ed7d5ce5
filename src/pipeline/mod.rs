//! Main processing pipeline.
//!
//! Connects discovery, per-file ingestion workers, and per-destination
//! sink writers.
//!
//! # Architecture
//!
//! One long-lived writer task per destination type, one short-lived worker
//! task per input file. Workers push decoded records onto bounded queues
//! (backpressure); writers deliver with bounded retry and report terminal
//! failures into the shared registry. The orchestrator waits for all
//! workers, then closes every queue and waits for the writers to drain, so
//! in-flight work is never discarded at exit.

pub mod worker;

use futures::stream::{FuturesUnordered, StreamExt};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::emit;
use crate::error::{PipelineError, TaskJoinSnafu};
use crate::metrics::events::{FileProcessed, FileStatus, FilesDiscovered};
use crate::sink::{MemcacheStore, SinkWriter, StoreRef};
use crate::source;
use crate::stats::DeliveryStats;

use worker::{Routes, ingest_file};

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Files scanned to completion (any disposition).
    pub files_processed: usize,
    /// Files whose worker aborted on a fatal open/decompress error.
    pub files_failed: usize,
    pub records_decoded: usize,
    pub decode_errors: usize,
    /// Records acknowledged by a destination store.
    pub records_delivered: usize,
    /// Records that exhausted their retries.
    pub delivery_failures: usize,
}

/// Main processing pipeline.
pub struct Pipeline {
    config: Config,
    stores: HashMap<String, StoreRef>,
}

impl Pipeline {
    /// Create a pipeline with one memcached client per configured
    /// destination.
    pub fn new(config: Config) -> Self {
        let timeout = config.delivery.timeout();
        let stores = config
            .destinations
            .iter()
            .map(|(destination, addr)| {
                let store: StoreRef = Arc::new(MemcacheStore::new(addr.clone(), timeout));
                (destination.clone(), store)
            })
            .collect();
        Self { config, stores }
    }

    /// Create a pipeline over externally supplied stores.
    ///
    /// Destinations present in the configuration but absent from `stores`
    /// get no queue; records routed to them count as per-line errors.
    pub fn with_stores(config: Config, stores: HashMap<String, StoreRef>) -> Self {
        Self { config, stores }
    }

    /// Run the pipeline to completion over the currently matching files.
    pub async fn run(self) -> Result<PipelineStats, PipelineError> {
        let registry = Arc::new(DeliveryStats::new());
        let writer_config = self.config.delivery.writer_config();
        let capacity = self.config.delivery.queue_capacity;

        // One queue + writer per destination type; the queue's read end is
        // owned by its writer alone.
        let mut writers = Vec::with_capacity(self.stores.len());
        let mut routes: Routes = HashMap::with_capacity(self.stores.len());
        for (destination, store) in &self.stores {
            let writer = SinkWriter::spawn(
                destination.clone(),
                store.clone(),
                registry.clone(),
                writer_config,
                capacity,
            );
            routes.insert(destination.clone(), writer.tx.clone());
            writers.push(writer);
        }
        let routes = Arc::new(routes);

        let files = source::discover_files(&self.config.source.pattern).await?;
        emit!(FilesDiscovered { count: files.len() });
        info!("Found {} input files", files.len());

        let mut stats = PipelineStats::default();
        let threshold = self.config.delivery.normal_error_rate;

        let mut workers: FuturesUnordered<_> = files
            .into_iter()
            .map(|path| {
                let routes = routes.clone();
                let registry = registry.clone();
                tokio::spawn(ingest_file(path, routes, registry, threshold))
            })
            .collect();

        while let Some(joined) = workers.next().await {
            match joined.context(TaskJoinSnafu)? {
                Ok(report) => {
                    stats.files_processed += 1;
                    stats.records_decoded += report.decoded;
                    stats.decode_errors += report.decode_errors;
                    stats.delivery_failures += report.delivery_failures;
                }
                Err(err) => {
                    // fatal for that file only; it stays unarchived for a
                    // later run to retry
                    stats.files_failed += 1;
                    emit!(FileProcessed {
                        status: FileStatus::Failed,
                    });
                    warn!("Skipping failed file: {err}");
                }
            }
        }

        // All producers are done: closing the queues lets each writer run
        // off the end of its (already resolved) backlog and exit.
        drop(routes);
        for writer in writers {
            let totals = writer.finish().await?;
            stats.records_delivered += totals.delivered;
        }

        info!("Pipeline completed: {:?}", stats);
        Ok(stats)
    }
}

/// Run the pipeline with the given configuration.
pub async fn run_pipeline(config: Config) -> Result<PipelineStats, PipelineError> {
    Pipeline::new(config).run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_stats_default() {
        let stats = PipelineStats::default();
        assert_eq!(stats.files_processed, 0);
        assert_eq!(stats.records_decoded, 0);
    }
}
