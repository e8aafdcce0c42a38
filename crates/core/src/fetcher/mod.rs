//! Download of external source datasets.

mod http;

pub use http::HttpFetcher;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::SourceConfig;

/// Errors that can occur while fetching a source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Fetch failed: {0}")]
    Other(String),
}

/// Fetches the raw content of a source.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Returns the name of this fetcher implementation.
    fn name(&self) -> &str;

    /// Downloads the full content behind `source.url`.
    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<u8>, FetchError>;
}
