//! Error types for OpenFEC API operations.

use thiserror::Error;

/// Errors from OpenFEC API operations.
///
/// `RateLimitExceeded` and `NetworkFailure` are only returned once the
/// client's backoff schedule is exhausted.
#[derive(Error, Debug)]
pub enum OpenFecError {
    #[error("Rate limited by OpenFEC API (HTTP 429) after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },
    #[error("Network failure: {0}")]
    NetworkFailure(String),
    #[error("Upstream error (HTTP {status}): {body}")]
    UpstreamError { status: u16, body: String },
    #[error("Failed to parse response: {0}")]
    ParseFailed(String),
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

impl OpenFecError {
    /// True for failures the client retries with backoff before surfacing.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. } | Self::NetworkFailure(_))
    }
}

impl From<reqwest::Error> for OpenFecError {
    fn from(e: reqwest::Error) -> Self {
        Self::NetworkFailure(e.to_string())
    }
}
