//! OpenFEC API client module: rate-limited access to committee history and reports.

pub mod client;
pub mod error;
pub mod rate_limiter;
pub mod types;

pub use client::OpenFecClient;
pub use error::OpenFecError;
pub use rate_limiter::{RateLimiter, RetryPolicy, TrackerSummary};
