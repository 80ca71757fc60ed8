//! Failure classification and collector-level errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::openfec::OpenFecError;
use crate::sink::SinkError;

/// Category of a failed work item, as stored in the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    RateLimitExceeded,
    NetworkFailure,
    UpstreamError { status: u16 },
    ParseFailed,
    InvalidUrl,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimitExceeded => write!(f, "rate_limit_exceeded"),
            Self::NetworkFailure => write!(f, "network_failure"),
            Self::UpstreamError { status } => write!(f, "upstream_error({})", status),
            Self::ParseFailed => write!(f, "parse_failed"),
            Self::InvalidUrl => write!(f, "invalid_url"),
        }
    }
}

/// Why a work item failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    /// 4xx other than 429, or a request that could not be built at all.
    pub fn is_client_error(&self) -> bool {
        match self.kind {
            FailureKind::UpstreamError { status } => (400..500).contains(&status) && status != 429,
            FailureKind::InvalidUrl => true,
            _ => false,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&OpenFecError> for FailureReason {
    fn from(e: &OpenFecError) -> Self {
        let kind = match e {
            OpenFecError::RateLimitExceeded { .. } => FailureKind::RateLimitExceeded,
            OpenFecError::NetworkFailure(_) => FailureKind::NetworkFailure,
            OpenFecError::UpstreamError { status, .. } => FailureKind::UpstreamError { status: *status },
            OpenFecError::ParseFailed(_) => FailureKind::ParseFailed,
            OpenFecError::InvalidUrl(_) => FailureKind::InvalidUrl,
        };
        Self {
            kind,
            message: e.to_string(),
        }
    }
}

/// Errors that abort a collection run.
///
/// Upstream failures never appear here; they are classified per work item.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}
