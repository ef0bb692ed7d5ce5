//! sleet: A standalone tool for loading installed-apps log batches into
//! per-device-type memcached stores.
//!
//! This tool scans gzip-compressed TSV files matching a glob pattern,
//! decodes each line into an installed-apps record, and delivers it to the
//! key-value store for the record's device-identity type, with bounded
//! retry and per-file outcome accounting.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sleet::config::Config;
use sleet::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, OpenLogFileSnafu, PipelineError};
use sleet::pipeline::run_pipeline;

/// Installed-apps log batch loader.
#[derive(Parser, Debug)]
#[command(name = "sleet")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Append diagnostics to this file instead of stdout.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // the appender guard must outlive the run so buffered lines get flushed
    let _guard = match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context(OpenLogFileSnafu { path })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    };

    info!("sleet starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    // Initialize metrics if enabled
    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        sleet::metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Source pattern: {}", config.source.pattern);
        info!("Destinations:");
        for (destination, addr) in &config.destinations {
            info!("  - {destination}: {addr}");
        }
        info!(
            "Delivery: queue capacity {}, {} attempts, {:?} between attempts, {:?} store timeout",
            config.delivery.queue_capacity,
            config.delivery.max_retries,
            config.delivery.retry_delay(),
            config.delivery.timeout()
        );
        info!("Normal error rate: {}", config.delivery.normal_error_rate);
        info!("Configuration is valid");
        return Ok(());
    }

    // Run the pipeline
    let stats = run_pipeline(config).await?;

    info!("Pipeline completed");
    info!("  Files processed: {}", stats.files_processed);
    info!("  Files failed: {}", stats.files_failed);
    info!("  Records decoded: {}", stats.records_decoded);
    info!("  Decode errors: {}", stats.decode_errors);
    info!("  Records delivered: {}", stats.records_delivered);
    info!("  Delivery failures: {}", stats.delivery_failures);

    Ok(())
}
