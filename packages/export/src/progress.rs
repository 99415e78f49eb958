//! Progress reporting for export runs.
//!
//! The driver emits [`ProgressEvent`]s through the [`ProgressReporter`]
//! trait. It knows nothing about terminals. Rendering lives upstream
//! (`order_export_cli_utils` provides a console implementation), and the
//! formatting helpers here are shared by every renderer.

use std::sync::Arc;
use std::time::Duration;

use order_export_models::ProgressEvent;

/// Sink for progress events emitted during a run.
///
/// Implementations must be `Send + Sync` so a single reporter can be shared
/// behind an [`Arc`].
pub trait ProgressReporter: Send + Sync {
    /// Handles one event. Must not fail; a reporter that cannot render an
    /// event should drop it.
    fn report(&self, event: &ProgressEvent);
}

/// A no-op implementation of [`ProgressReporter`] that silently ignores all
/// events.
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Returns a shared [`NullReporter`] instance for convenient use.
#[must_use]
pub fn null_reporter() -> Arc<dyn ProgressReporter> {
    Arc::new(NullReporter)
}

/// Formats `saved / expected` as a percentage with one decimal place.
///
/// Returns `"unknown"` when the expected total is missing or zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_progress(saved: u64, expected: Option<u64>) -> String {
    match expected {
        Some(expected) if expected > 0 => {
            format!("{:.1}%", saved as f64 / expected as f64 * 100.0)
        }
        _ => "unknown".to_owned(),
    }
}

/// Formats a running count against the expected total, e.g. `"12/100"`.
#[must_use]
pub fn format_saved_of(saved: u64, expected: Option<u64>) -> String {
    match expected {
        Some(expected) if expected > 0 => format!("{saved}/{expected}"),
        _ => format!("{saved}/unknown"),
    }
}

/// Formats a byte count in kibibytes with one decimal place, e.g. `"1.5 KB"`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_kib(bytes: u64) -> String {
    format!("{:.1} KB", bytes as f64 / 1024.0)
}

/// Formats a duration as whole minutes and seconds, e.g. `"2m 5s"`.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}
