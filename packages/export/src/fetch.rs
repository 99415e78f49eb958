//! Batch fetching from the export endpoint.
//!
//! One GET per batch: `<base_url>?batch=<cursor>&per_page=<n>`. The response
//! envelope is validated and returned as a [`BatchResponse`]. Failures are
//! classified into [`FetchError`] variants so callers can tell a timeout
//! from a refused connection from a server-side failure without inspecting
//! messages. There is no retry here; every error goes back to the caller.

use std::fmt::Write as _;
use std::time::Duration;

use order_export_models::{BatchResponse, ExportConfig};

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 300;

/// Errors that can occur while fetching a batch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// No complete response arrived within the configured timeout.
    #[error("request timed out after {} seconds", .after.as_secs())]
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The connection failed below the HTTP layer.
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The server answered, but not with a usable batch.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The fetcher could not be built from its configuration.
    #[error("invalid fetcher configuration: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },
}

/// Ways a response can fail to be a valid batch.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The server responded with a non-success HTTP status.
    #[error("server responded with HTTP {0}")]
    Status(reqwest::StatusCode),

    /// The body is not a JSON batch envelope.
    #[error("failed to parse JSON response: {0}")]
    InvalidBody(#[source] serde_json::Error),

    /// The envelope reported `success: false`.
    #[error("API returned success=false: {}", .detail.as_deref().unwrap_or("Unknown error"))]
    Unsuccessful {
        /// Error detail supplied by the server, if any.
        detail: Option<String>,
    },
}

/// A source of export batches.
///
/// [`HttpBatchFetcher`] is the production implementation; tests substitute
/// scripted sources to drive the pagination state machine.
pub trait BatchSource: Send + Sync {
    /// Fetches the batch at `cursor` with `per_page` records.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the request fails or the response is not a
    /// successful batch.
    fn fetch_batch(
        &self,
        cursor: u64,
        per_page: u32,
    ) -> impl std::future::Future<Output = Result<BatchResponse, FetchError>> + Send;

    /// Describes the request for `cursor`, for display.
    fn request_url(&self, cursor: u64, per_page: u32) -> String;
}

/// Fetches batches over HTTP with a static header set and a bounded timeout.
#[derive(Debug, Clone)]
pub struct HttpBatchFetcher {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBatchFetcher {
    /// Builds a fetcher from the export configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if a configured header name or value
    /// is invalid, or [`FetchError::Transport`] if the HTTP client cannot be
    /// initialised.
    pub fn new(config: &ExportConfig) -> Result<Self, FetchError> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in &config.headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                FetchError::Config {
                    message: format!("invalid header name '{key}': {e}"),
                }
            })?;
            let val = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                FetchError::Config {
                    message: format!("invalid header value '{value}': {e}"),
                }
            })?;
            header_map.insert(name, val);
        }

        let timeout = config.request_timeout();
        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .timeout(timeout)
            .build()
            .map_err(FetchError::Transport)?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            timeout,
        })
    }

    /// Builds the full request URL for a batch.
    fn build_url(&self, cursor: u64, per_page: u32) -> String {
        let mut url = self.base_url.clone();
        let separator = if url.contains('?') { '&' } else { '?' };
        // Writing to a String cannot fail.
        let _ = write!(url, "{separator}batch={cursor}&per_page={per_page}");
        url
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                after: self.timeout,
            }
        } else {
            FetchError::Transport(error)
        }
    }
}

impl BatchSource for HttpBatchFetcher {
    async fn fetch_batch(&self, cursor: u64, per_page: u32) -> Result<BatchResponse, FetchError> {
        let url = self.build_url(cursor, per_page);
        log::debug!("Fetching batch {cursor}: {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            log::debug!("Batch {cursor}: HTTP {status}");
            return Err(ProtocolError::Status(status).into());
        }

        let text = response.text().await.map_err(|e| self.classify(e))?;
        log::trace!("Batch {cursor}: received {} bytes", text.len());

        parse_batch(&text)
    }

    fn request_url(&self, cursor: u64, per_page: u32) -> String {
        self.build_url(cursor, per_page)
    }
}

/// Parses and validates a batch envelope.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidBody`] if the text is not a JSON batch
/// envelope, or [`ProtocolError::Unsuccessful`] if it reports
/// `success: false`.
pub fn parse_batch(text: &str) -> Result<BatchResponse, FetchError> {
    let batch: BatchResponse = serde_json::from_str(text).map_err(|e| {
        log::debug!("Unparseable batch body: {}", preview(text));
        ProtocolError::InvalidBody(e)
    })?;

    if !batch.success {
        return Err(ProtocolError::Unsuccessful {
            detail: batch.error,
        }
        .into());
    }

    Ok(batch)
}

fn preview(text: &str) -> &str {
    if text.len() <= BODY_PREVIEW_LEN {
        return text;
    }
    let mut end = BODY_PREVIEW_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
