#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Console rendering for the order export downloader.
//!
//! Provides [`ConsoleReporter`], a [`ProgressReporter`] that prints styled
//! progress lines and keeps an `indicatif` bar of saved records, plus
//! [`init_logger`] which sets up `indicatif-log-bridge` so that `log::info!`
//! and friends are suspended while progress bars redraw.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use order_export::models::{ProgressEvent, RunSummary};
use order_export::progress::{
    ProgressReporter, format_elapsed, format_kib, format_progress, format_saved_of,
};

pub use indicatif::MultiProgress;

/// Width of the `=` rule around section headers.
const RULE_WIDTH: usize = 80;

/// Prints progress events to the terminal.
///
/// Lines are printed with the bars suspended so they never interleave with
/// a redraw. The records bar starts as a spinner and becomes a full bar once
/// the expected total is known.
pub struct ConsoleReporter {
    multi: MultiProgress,
    bar: ProgressBar,
    /// Style to switch to once the expected total is known.
    bar_style: ProgressStyle,
}

impl ConsoleReporter {
    /// Creates a shared reporter drawing into `multi`, ready to hand to the
    /// exporter.
    #[must_use]
    pub fn shared(multi: &MultiProgress) -> Arc<dyn ProgressReporter> {
        Arc::new(Self::attach(multi))
    }

    fn attach(multi: &MultiProgress) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message("waiting for first batch");

        let bar_style = ProgressStyle::with_template(
            "  {msg} {wide_bar:.cyan/dim} {pos}/{len} {percent}% [{elapsed_precise}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Self {
            multi: multi.clone(),
            bar,
            bar_style,
        }
    }

    fn print(&self, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        self.multi.suspend(|| {
            for line in lines {
                println!("{line}");
            }
        });
    }
}

impl ProgressReporter for ConsoleReporter {
    fn report(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunInfo { expected_total, .. } if *expected_total > 0 => {
                self.bar.set_length(*expected_total);
                self.bar.set_position(0);
                self.bar.set_style(self.bar_style.clone());
                self.bar.set_message("orders");
            }
            ProgressEvent::BatchStarted { cursor, .. } => {
                self.bar.set_message(format!("batch {cursor}"));
            }
            ProgressEvent::RecordSaved { .. } => self.bar.inc(1),
            ProgressEvent::Finished(_) => self.bar.finish_and_clear(),
            _ => {}
        }

        self.print(&render(event));
    }
}

/// Renders one event as display lines.
///
/// Pure formatting: the same event always yields the same lines, apart from
/// the wall-clock stamps on [`ProgressEvent::RunStarted`] and
/// [`ProgressEvent::Finished`].
#[must_use]
pub fn render(event: &ProgressEvent) -> Vec<String> {
    match event {
        ProgressEvent::RunStarted {
            base_url,
            per_page,
            initial_batch,
            output_dir,
        } => {
            let mut lines = header("Order Export Downloader");
            lines.push(info(&format!("Base URL: {base_url}")));
            lines.push(info(&format!("Per page: {per_page}")));
            lines.push(info(&format!("Initial batch: {initial_batch}")));
            lines.push(info(&format!("Output directory: {}", output_dir.display())));
            lines.push(info(&format!("Started at: {}", now())));
            lines
        }
        ProgressEvent::OutputReady { output_dir } => {
            vec![success(&format!(
                "Output directory ready: {}",
                output_dir.display()
            ))]
        }
        ProgressEvent::BatchStarted { cursor, url } => {
            let mut lines = header(&format!("Processing Batch {cursor}"));
            lines.push(info(&format!("Fetching batch {cursor} from: {url}")));
            lines
        }
        ProgressEvent::RunInfo {
            storage_type,
            expected_total,
            total_batches,
        } => vec![
            info(&format!("Storage type: {storage_type}")),
            info(&format!("Total orders to download: {expected_total}")),
            info(&format!("Total batches: {total_batches}")),
        ],
        ProgressEvent::BatchReceived { processed, .. } => {
            vec![info(&format!("Orders in this batch: {processed}"))]
        }
        ProgressEvent::RecordSaved {
            index,
            processed,
            id,
            path,
            bytes,
        } => vec![success(&format!(
            "  [{index}/{processed}] Saved order {id} → {} ({})",
            path.display(),
            format_kib(*bytes)
        ))],
        ProgressEvent::RecordSkipped {
            index,
            processed,
            reason,
        } => vec![warning(&format!(
            "  [{index}/{processed}] {reason}, skipping..."
        ))],
        ProgressEvent::EmptyBatch { .. } => vec![warning("No orders in this batch")],
        ProgressEvent::BatchComplete {
            cursor,
            saved_in_batch,
            total_saved,
            expected_total,
            memory_usage,
        } => vec![
            String::new(),
            style(format!("Batch {cursor} complete:"))
                .green()
                .bold()
                .to_string(),
            format!("  • Orders saved in this batch: {saved_in_batch}"),
            format!(
                "  • Total orders saved: {}",
                format_saved_of(*total_saved, *expected_total)
            ),
            format!(
                "  • Progress: {}",
                format_progress(*total_saved, *expected_total)
            ),
            format!(
                "  • Memory usage: {}",
                memory_usage.as_deref().unwrap_or("N/A")
            ),
        ],
        ProgressEvent::CursorOverride {
            expected,
            suggested,
        } => vec![warning(&format!(
            "Expected next batch {expected}, but API suggests {suggested}"
        ))],
        ProgressEvent::Waiting { delay } => vec![info(&format!(
            "Waiting {}s before next batch...",
            delay.as_secs_f64()
        ))],
        ProgressEvent::BatchLimitReached { limit } => {
            vec![warning(&format!("Reached batch limit ({limit}), stopping"))]
        }
        ProgressEvent::AllBatchesProcessed => {
            vec![String::new(), success("All batches processed!")]
        }
        ProgressEvent::Finished(summary) => render_summary(summary),
    }
}

fn render_summary(summary: &RunSummary) -> Vec<String> {
    let mut lines = header("Download Complete!");
    lines.push(success(&format!(
        "Total orders saved: {}",
        summary.total_saved
    )));
    if summary.total_skipped > 0 {
        lines.push(warning(&format!(
            "Orders skipped: {}",
            summary.total_skipped
        )));
    }
    lines.push(success(&format!(
        "Storage type: {}",
        summary.storage_type.as_deref().unwrap_or("Unknown")
    )));
    lines.push(success(&format!(
        "Output directory: {}",
        summary.output_dir.display()
    )));
    lines.push(success(&format!(
        "Execution time: {}",
        format_elapsed(summary.elapsed)
    )));
    lines.push(success(&format!("Finished at: {}", now())));

    lines.push(String::new());
    lines.push(info("Sample order files:"));
    for sample in &summary.samples {
        lines.push(format!("  • {} ({})", sample.name, format_kib(sample.bytes)));
    }
    if summary.sample_total > summary.samples.len() {
        lines.push(format!(
            "  ... and {} more files",
            summary.sample_total - summary.samples.len()
        ));
    }
    lines
}

/// Renders a fatal error and its source chain as a single marked line.
#[must_use]
pub fn render_failure(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        // `#[error(transparent)]` and `{0}` wrappers repeat their source.
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    style(format!("✗ Download failed: {message}"))
        .red()
        .to_string()
}

fn header(title: &str) -> Vec<String> {
    let rule = "=".repeat(RULE_WIDTH);
    vec![
        String::new(),
        style(&rule).magenta().bold().to_string(),
        style(title).magenta().bold().to_string(),
        style(&rule).magenta().bold().to_string(),
        String::new(),
    ]
}

fn success(message: &str) -> String {
    style(format!("✓ {message}")).green().to_string()
}

fn info(message: &str) -> String {
    style(format!("ℹ {message}")).cyan().to_string()
}

fn warning(message: &str) -> String {
    style(format!("⚠ {message}")).yellow().to_string()
}

fn now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    // Build the pretty-env-logger logger manually so we can wrap it.
    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // Ignore error if logger was already set (e.g., in tests)

    log::set_max_level(level);

    multi
}
