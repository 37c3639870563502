//! Fetch error taxonomy shared by all source providers.

use feedguard_core::retry::Retryable;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("anti-bot challenge served for {url}")]
    Challenge { url: String },

    #[error("malformed feed from {url}: {detail}")]
    Malformed { url: String, detail: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl FetchError {
    /// Transient failures are worth retrying with backoff; permanent ones
    /// surface immediately and skip the provider for the run.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Challenge { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Http(e) => e.is_timeout() || e.is_connect(),
            FetchError::Malformed { .. } => false,
        }
    }
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        FetchError::is_transient(self)
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
