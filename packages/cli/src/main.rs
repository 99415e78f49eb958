#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the order export downloader.
//!
//! With no arguments the downloader runs with the built-in defaults. A TOML
//! file (`--config`) can override any field, and individual flags override
//! the file. Exits non-zero on any fetch or write failure and on Ctrl-C.
//!
//! Uses `indicatif-log-bridge` (via [`order_export_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and the progress bar never fight for the terminal.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use order_export::models::{ConfigError, ExportConfig, RunSummary};
use order_export::{Exporter, HttpBatchFetcher, JsonFileStore};
use order_export_cli_utils::{ConsoleReporter, MultiProgress, render_failure};

#[derive(Parser, Debug)]
#[command(
    name = "order_export",
    about = "Download every order from a batch export endpoint, one JSON file per order"
)]
struct Cli {
    /// TOML configuration file; unset fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Export endpoint URL
    #[arg(long)]
    base_url: Option<String>,
    /// Orders requested per batch
    #[arg(long)]
    per_page: Option<u32>,
    /// Batch number to start from
    #[arg(long)]
    initial_batch: Option<u64>,
    /// Directory that receives one file per order
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Per-request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Pause between batches in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,
    /// Stop after this many batches even if the server reports more
    #[arg(long)]
    max_batches: Option<u32>,
}

impl Cli {
    /// Resolves the effective configuration: flags over file over defaults.
    fn into_config(self) -> Result<ExportConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ExportConfig::load(path)?,
            None => ExportConfig::default(),
        };

        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
        if let Some(per_page) = self.per_page {
            config.per_page = per_page;
        }
        if let Some(initial_batch) = self.initial_batch {
            config.initial_batch = initial_batch;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(timeout_secs) = self.timeout_secs {
            config.request_timeout_secs = timeout_secs;
        }
        if let Some(delay_ms) = self.delay_ms {
            config.batch_delay_ms = delay_ms;
        }
        if self.max_batches.is_some() {
            config.max_batches = self.max_batches;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let multi = order_export_cli_utils::init_logger();
    let cli = Cli::parse();

    match run(cli, &multi).await {
        Ok(summary) => {
            log::debug!(
                "Export finished: {} saved, {} skipped in {:?}",
                summary.total_saved,
                summary.total_skipped,
                summary.elapsed
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::debug!("Export failed: {e:?}");
            multi.suspend(|| eprintln!("{}", render_failure(e.as_ref())));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, multi: &MultiProgress) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let config = cli.into_config()?;
    let fetcher = HttpBatchFetcher::new(&config)?;
    let store = JsonFileStore::new(&config.output_dir, &config.file_extension);
    let exporter = Exporter::new(config, fetcher, store, ConsoleReporter::shared(multi));

    let summary = exporter.run_until(ctrl_c()).await?;
    Ok(summary)
}

/// Resolves on Ctrl-C. If the signal handler cannot be installed the run is
/// simply not interruptible.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Unable to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
