#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Export configuration, batch response envelope, and progress event types.
//!
//! These types are shared between the export engine (`order_export`) and the
//! CLI so that neither has to depend on the other's internals.

pub mod config;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

pub use config::{ConfigError, ExportConfig};

/// A single exported record, persisted verbatim.
///
/// Field order from the server is preserved (`serde_json` is built with
/// `preserve_order`), so the file on disk reads the same as the response.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// The JSON envelope returned by the export endpoint for one batch.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BatchResponse {
    /// Whether the server produced the batch. A missing field counts as a
    /// failure.
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: bool,
    /// Records in this batch, in server order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub orders: Vec<Record>,
    /// Number of records the server says it processed for this batch.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub processed: Option<u64>,
    /// Expected grand total across all batches.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total_orders: Option<u64>,
    /// Number of batches the server expects to serve.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total_batches: Option<u64>,
    /// Authoritative continuation flag.
    #[serde(default, deserialize_with = "null_as_default")]
    pub has_more: bool,
    /// Server-suggested cursor for the next request.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub next_batch: Option<u64>,
    /// Backing storage the server read from (e.g. `"HPOS"` or `"Legacy"`).
    #[serde(default)]
    pub storage_type: Option<String>,
    /// Peak memory reported by the server, already formatted.
    #[serde(default)]
    pub memory_usage: Option<String>,
    /// Failure detail, present when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
    /// Echo of the requested batch number.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub batch: Option<u64>,
    /// Echo of the requested page size.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub per_page: Option<u64>,
}

impl BatchResponse {
    /// Number of records processed in this batch, falling back to the length
    /// of [`orders`](Self::orders) when the server omits it.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed
            .unwrap_or_else(|| u64::try_from(self.orders.len()).unwrap_or(u64::MAX))
    }
}

/// Deserializes an optional integer that may arrive as a JSON integer, an
/// integral float (PHP's `ceil()` returns floats), or a numeric string.
///
/// Values that cannot be read as a non-negative integer become `None`.
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(json_u64))
}

/// Deserializes a field where an explicit `null` means the same as a missing
/// key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Reads a non-negative integer out of a loosely typed JSON value.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn json_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .filter(|f| *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Returns the record's identifier as used for its file name.
///
/// Accepts a non-empty string or a non-zero number. Anything else (missing,
/// `null`, `""`, `0`, booleans, arrays, objects) counts as no identifier.
#[must_use]
pub fn record_identifier(record: &Record) -> Option<String> {
    match record.get("id")? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) if !is_zero(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_zero(n: &serde_json::Number) -> bool {
    n.as_u64() == Some(0)
        || n.as_i64() == Some(0)
        || n.as_f64().is_some_and(|f| f.abs() < f64::EPSILON)
}

/// Why a record was not written. Skips are reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    /// The record has no usable `id` field.
    MissingIdentifier,
    /// The identifier cannot be used as a single file name.
    UnsafeIdentifier {
        /// The rejected identifier.
        id: String,
    },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifier => f.write_str("record has no ID"),
            Self::UnsafeIdentifier { id } => {
                write!(f, "record ID {id:?} is not a valid file name")
            }
        }
    }
}

/// A saved output file listed in the final summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSample {
    /// File name relative to the output directory.
    pub name: String,
    /// File size in bytes.
    pub bytes: u64,
}

/// Result of a completed export run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Records written to disk.
    pub total_saved: u64,
    /// Records skipped for lack of a usable identifier.
    pub total_skipped: u64,
    /// Expected total reported by the first batch.
    pub expected_total: Option<u64>,
    /// Storage type reported by the first batch.
    pub storage_type: Option<String>,
    /// Number of batches fetched successfully.
    pub batches_fetched: u64,
    /// Where the records were written.
    pub output_dir: PathBuf,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// First few output files, sorted by name.
    pub samples: Vec<OutputSample>,
    /// Total number of output files in the directory.
    pub sample_total: usize,
}

/// Progress reporting during an export run.
///
/// Emitted by the pagination driver and rendered by whichever
/// `ProgressReporter` the caller plugs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressEvent {
    /// The run is starting with this configuration.
    RunStarted {
        /// Endpoint being paginated.
        base_url: String,
        /// Records requested per batch.
        per_page: u32,
        /// First batch cursor.
        initial_batch: u64,
        /// Output directory.
        output_dir: PathBuf,
    },
    /// The output directory exists and is writable.
    OutputReady {
        /// Output directory.
        output_dir: PathBuf,
    },
    /// A batch request is about to be sent.
    BatchStarted {
        /// Cursor being requested.
        cursor: u64,
        /// Full request URL, for display.
        url: String,
    },
    /// Run-wide values captured from the first batch.
    RunInfo {
        /// Server storage type.
        storage_type: String,
        /// Expected grand total.
        expected_total: u64,
        /// Server-declared batch count.
        total_batches: u64,
    },
    /// A batch arrived.
    BatchReceived {
        /// Cursor of the batch.
        cursor: u64,
        /// Records the server says are in this batch.
        processed: u64,
    },
    /// A record was written.
    RecordSaved {
        /// One-based position within the batch.
        index: u64,
        /// Records in the batch.
        processed: u64,
        /// Record identifier.
        id: String,
        /// Destination file.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
    },
    /// A record was skipped.
    RecordSkipped {
        /// One-based position within the batch.
        index: u64,
        /// Records in the batch.
        processed: u64,
        /// Why it was skipped.
        reason: SkipReason,
    },
    /// The batch held no records, which ends the run.
    EmptyBatch {
        /// Cursor of the empty batch.
        cursor: u64,
    },
    /// Every record in the batch was handled.
    BatchComplete {
        /// Cursor of the batch.
        cursor: u64,
        /// Records written from this batch.
        saved_in_batch: u64,
        /// Records written so far in the run.
        total_saved: u64,
        /// Expected grand total, if known.
        expected_total: Option<u64>,
        /// Server memory usage, if reported.
        memory_usage: Option<String>,
    },
    /// The server redirected the cursor away from the local increment.
    CursorOverride {
        /// Cursor the driver computed.
        expected: u64,
        /// Cursor the server asked for.
        suggested: u64,
    },
    /// Pausing before the next batch.
    Waiting {
        /// Length of the pause.
        delay: Duration,
    },
    /// The configured batch limit stopped the run early.
    BatchLimitReached {
        /// The configured limit.
        limit: u32,
    },
    /// The server reported no further batches.
    AllBatchesProcessed,
    /// The run finished successfully.
    Finished(RunSummary),
}
