//! Immutable configuration for an export run.
//!
//! Every tunable the downloader has lives in [`ExportConfig`]. The defaults
//! reproduce the stock downloader, a TOML file can override any subset of
//! fields, and the CLI layers individual flag overrides on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default export endpoint.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/fullorderexport.php";

/// Default number of records requested per batch.
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "./orders";

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default pause between batches in milliseconds.
pub const DEFAULT_BATCH_DELAY_MS: u64 = 2_000;

/// Default number of output files listed in the final summary.
pub const DEFAULT_SAMPLE_LIMIT: usize = 5;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has unknown fields.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds a value the exporter cannot use.
    #[error("invalid config value for `{field}`: {message}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Configuration for one export run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Export endpoint; `batch` and `per_page` are appended as query
    /// parameters.
    pub base_url: String,
    /// Records requested per batch.
    pub per_page: u32,
    /// Cursor of the first batch to fetch.
    pub initial_batch: u64,
    /// Directory that receives one file per record.
    pub output_dir: PathBuf,
    /// Extension of each record file, without the leading dot.
    pub file_extension: String,
    /// Bound on each request, from send to fully read body.
    pub request_timeout_secs: u64,
    /// Pause between successful batches.
    pub batch_delay_ms: u64,
    /// Stop after this many batches even if the server reports more.
    pub max_batches: Option<u32>,
    /// Number of output files listed in the final summary.
    pub sample_limit: usize,
    /// Static request headers.
    pub headers: BTreeMap<String, String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            per_page: DEFAULT_PER_PAGE,
            initial_batch: 0,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            file_extension: "json".to_owned(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            max_batches: None,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            headers: browser_headers(),
        }
    }
}

impl ExportConfig {
    /// Parses a configuration from a TOML string. Fields that are not set
    /// keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed or contains
    /// unknown fields, or [`ConfigError::Invalid`] if a value fails
    /// validation.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::de::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise
    /// the same errors as [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Checks that every field holds a usable value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "base_url",
                message: format!("expected an http(s) URL, got '{}'", self.base_url),
            });
        }
        if self.per_page == 0 {
            return Err(ConfigError::Invalid {
                field: "per_page",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.file_extension.is_empty()
            || self
                .file_extension
                .contains(['.', '/', '\\', std::path::MAIN_SEPARATOR])
        {
            return Err(ConfigError::Invalid {
                field: "file_extension",
                message: format!(
                    "expected a bare extension such as 'json', got '{}'",
                    self.file_extension
                ),
            });
        }
        if self.max_batches == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_batches",
                message: "must be at least 1 when set".to_owned(),
            });
        }
        Ok(())
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Pause between successful batches.
    #[must_use]
    pub const fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Request headers that mimic a desktop browser. Some export endpoints sit
/// behind hosting that rejects obvious scripted clients.
///
/// `Accept-Encoding` is left to the HTTP client so it only advertises
/// encodings it can decode.
#[must_use]
pub fn browser_headers() -> BTreeMap<String, String> {
    [
        (
            "User-Agent",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        ),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,\
             image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
        ),
        ("Accept-Language", "en-US,en;q=0.9,hu;q=0.8"),
        ("Connection", "keep-alive"),
        ("Upgrade-Insecure-Requests", "1"),
        ("Sec-Fetch-Dest", "document"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-Site", "none"),
        ("Cache-Control", "max-age=0"),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_owned(), value.to_owned()))
    .collect()
}
