//! Load-test configuration payload retrieval.
//!
//! A payload location is either an `http://`/`https://` URL or a local path.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from fetching a configuration payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Local file could not be read.
    #[error("failed to read {path}")]
    Read {
        /// Local path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// HTTP request could not be completed.
    #[error("failed to fetch {url}")]
    Http {
        /// Requested URL.
        url: String,
        /// Underlying HTTP client error.
        source: reqwest::Error,
    },

    /// Server answered with a non-success status.
    #[error("failed to fetch {url}: HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
}

/// Fetches configuration payload bytes from a location.
#[async_trait]
pub trait PayloadLoader: Send + Sync {
    /// Fetch the bytes at `location`.
    async fn load(&self, location: &str) -> Result<Vec<u8>, PayloadError>;
}

/// Returns true if `location` should be fetched over HTTP.
pub fn is_url(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Loader that reads local files and fetches `http(s)` URLs.
#[derive(Debug, Clone, Default)]
pub struct FileOrUrlLoader {
    client: reqwest::Client,
}

impl FileOrUrlLoader {
    /// Create a loader with a default HTTP client.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayloadLoader for FileOrUrlLoader {
    async fn load(&self, location: &str) -> Result<Vec<u8>, PayloadError> {
        if !is_url(location) {
            let path = PathBuf::from(location);
            return tokio::fs::read(&path)
                .await
                .map_err(|source| PayloadError::Read { path, source });
        }

        let http_err = |source| PayloadError::Http {
            url: location.to_string(),
            source,
        };

        let response = self.client.get(location).send().await.map_err(http_err)?;
        if !response.status().is_success() {
            return Err(PayloadError::Status {
                url: location.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await.map_err(http_err)?;
        Ok(body.to_vec())
    }
}
