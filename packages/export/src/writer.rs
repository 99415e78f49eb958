//! Record persistence.
//!
//! Each record is written to `<output_dir>/<id>.<ext>` as pretty-printed
//! JSON, with the server's field order and non-ASCII text kept as-is.
//! Records without a usable identifier are skipped rather than failing the
//! run; any I/O fault is returned as a [`WriteError`].

use std::path::{Path, PathBuf};

use order_export_models::{OutputSample, Record, SkipReason, record_identifier};

/// An I/O failure while persisting a record.
#[derive(Debug, thiserror::Error)]
#[error("failed to save record {id} to {}: {source}", .path.display())]
pub struct WriteError {
    /// Identifier of the record being written.
    pub id: String,
    /// Destination that could not be written.
    pub path: PathBuf,
    /// Underlying I/O error.
    pub source: std::io::Error,
}

/// Result of handing one record to a [`RecordStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The record was written.
    Saved {
        /// Record identifier.
        id: String,
        /// Destination file.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
    },
    /// The record was not written; this is not an error.
    Skipped(SkipReason),
}

/// Destination for exported records.
pub trait RecordStore: Send + Sync {
    /// Ensures the destination exists and can receive records.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the destination cannot be created.
    fn prepare(&self) -> std::io::Result<()>;

    /// Persists one record.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`] on any I/O failure.
    fn save(&self, record: &Record) -> Result<SaveOutcome, WriteError>;

    /// Where records are written, for display.
    fn location(&self) -> &Path;

    /// Lists up to `limit` stored outputs sorted by name, together with the
    /// total number of outputs.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the destination cannot be listed.
    fn samples(&self, limit: usize) -> std::io::Result<(Vec<OutputSample>, usize)>;
}

/// Writes each record to its own JSON file in a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    output_dir: PathBuf,
    extension: String,
}

impl JsonFileStore {
    /// Creates a store writing `<id>.<extension>` files under `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            output_dir: output_dir.into(),
            extension: extension.to_owned(),
        }
    }

    /// Destination for a record with the given identifier.
    #[must_use]
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.output_dir.join(format!("{id}.{}", self.extension))
    }
}

impl RecordStore for JsonFileStore {
    fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.output_dir)
    }

    fn save(&self, record: &Record) -> Result<SaveOutcome, WriteError> {
        let Some(id) = record_identifier(record) else {
            return Ok(SaveOutcome::Skipped(SkipReason::MissingIdentifier));
        };
        if !is_safe_file_stem(&id) {
            return Ok(SaveOutcome::Skipped(SkipReason::UnsafeIdentifier { id }));
        }

        let path = self.path_for(&id);
        let contents = match serde_json::to_vec_pretty(record) {
            Ok(contents) => contents,
            Err(e) => {
                return Err(WriteError {
                    id,
                    path,
                    source: std::io::Error::other(e),
                });
            }
        };

        if let Err(source) = std::fs::write(&path, &contents) {
            return Err(WriteError { id, path, source });
        }

        log::trace!("Wrote {} bytes to {}", contents.len(), path.display());

        Ok(SaveOutcome::Saved {
            id,
            path,
            bytes: u64::try_from(contents.len()).unwrap_or(u64::MAX),
        })
    }

    fn location(&self) -> &Path {
        &self.output_dir
    }

    fn samples(&self, limit: usize) -> std::io::Result<(Vec<OutputSample>, usize)> {
        sample_outputs(&self.output_dir, &self.extension, limit)
    }
}

/// Lists files with the given extension in `dir`, sorted by name.
///
/// Returns at most `limit` entries plus the total number of matching files.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be read.
pub fn sample_outputs(
    dir: &Path,
    extension: &str,
    limit: usize,
) -> std::io::Result<(Vec<OutputSample>, usize)> {
    let mut outputs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        outputs.push(OutputSample {
            name: entry.file_name().to_string_lossy().into_owned(),
            bytes: metadata.len(),
        });
    }

    outputs.sort_by(|a, b| a.name.cmp(&b.name));
    let total = outputs.len();
    outputs.truncate(limit);
    Ok((outputs, total))
}

/// Whether an identifier can be used as a single file name inside the
/// output directory.
fn is_safe_file_stem(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0'])
}
