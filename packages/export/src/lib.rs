#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch-paginated export downloader.
//!
//! Pages through a remote export endpoint with a [`BatchSource`], hands each
//! record to a [`RecordStore`], and reports every step to a
//! [`ProgressReporter`]. The [`Exporter`] owns the pagination state machine;
//! fetching, persistence, and rendering are all pluggable so the machine can
//! run headlessly in tests.
//!
//! Every fetch or write failure ends the run. Nothing is retried.

pub mod driver;
pub mod fetch;
pub mod progress;
pub mod writer;

use std::path::PathBuf;

pub use driver::{Exporter, RunState};
pub use fetch::{BatchSource, FetchError, HttpBatchFetcher, ProtocolError};
pub use order_export_models as models;
pub use progress::{NullReporter, ProgressReporter, null_reporter};
pub use writer::{JsonFileStore, RecordStore, SaveOutcome, WriteError};

/// Errors that end an export run.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The output directory could not be created.
    #[error("failed to prepare output directory {}: {source}", .path.display())]
    Setup {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Fetching a batch failed.
    #[error("batch {cursor} failed: {source}")]
    Fetch {
        /// Cursor of the failed batch.
        cursor: u64,
        /// What went wrong.
        source: FetchError,
    },

    /// Writing a record failed.
    #[error(transparent)]
    Write(#[from] WriteError),

    /// The run was cancelled by the user.
    #[error("download interrupted by user")]
    Interrupted,
}
