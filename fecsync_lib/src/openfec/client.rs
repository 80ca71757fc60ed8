//! OpenFEC API client implementation.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::error::OpenFecError;
use super::rate_limiter::{with_retry, RateLimiter, RetryPolicy, TrackerSummary};
use super::types::{HistoryQuery, HistoryRecord, Page, RawFiling, ReportsQuery};
use crate::paginator::Paginator;

/// Request timeout for OpenFEC API calls (seconds).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Largest page size the API accepts.
pub const MAX_PER_PAGE: u32 = 100;

/// Longest upstream error body kept in `UpstreamError`.
const BODY_SNIPPET_CHARS: usize = 200;

/// Rate-limited OpenFEC API client.
///
/// Every request goes through the shared [`RateLimiter`] and the client's
/// [`RetryPolicy`]; callers only ever see the final outcome.
pub struct OpenFecClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    per_page: u32,
}

impl OpenFecClient {
    /// Create a new OpenFecClient with default base URL.
    pub fn new(api_key: String) -> Result<Self, OpenFecError> {
        Self::with_base_url("https://api.open.fec.gov/v1", api_key)
    }

    /// Create a new OpenFecClient with custom base URL (for testing with wiremock).
    pub fn with_base_url(base_url: &str, api_key: String) -> Result<Self, OpenFecError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: Arc::new(RateLimiter::default()),
            retry: RetryPolicy::default(),
            per_page: MAX_PER_PAGE,
        })
    }

    /// Share an existing limiter (the hourly quota is per API key, not per client).
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, MAX_PER_PAGE);
        self
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Snapshot of request outcomes so far.
    pub fn tracker_summary(&self) -> TrackerSummary {
        self.limiter.tracker().summary()
    }

    /// Issue a GET through the limiter, retrying 429s and network failures.
    pub async fn issue<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, OpenFecError> {
        with_retry(&self.limiter, &self.retry, || self.get_once(path, params)).await
    }

    /// Single GET attempt with no pacing or retry.
    async fn get_once<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, OpenFecError> {
        let url = format!("{}{}", self.base_url, path);
        let url = reqwest::Url::parse(&url).map_err(|e| OpenFecError::InvalidUrl(format!("{url}: {e}")))?;

        // Add api_key to params
        let mut all_params = params.to_vec();
        all_params.push(("api_key".to_string(), self.api_key.clone()));

        tracing::debug!(path, "GET");
        let response = self.client.get(url).query(&all_params).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OpenFecError::RateLimitExceeded { attempts: 1 });
        }

        let body = response.text().await?;

        if !status.is_success() {
            return Err(OpenFecError::UpstreamError {
                status: status.as_u16(),
                body: snippet(&body),
            });
        }

        serde_json::from_str::<T>(&body).map_err(|e| {
            OpenFecError::ParseFailed(format!("{} | body: {}", e, snippet(&body)))
        })
    }

    /// Fetch one page of a committee's cycle-by-cycle history.
    pub async fn committee_history_page(
        &self,
        committee_id: &str,
        query: &HistoryQuery,
    ) -> Result<Page<HistoryRecord>, OpenFecError> {
        let path = format!("/committee/{}/history/", committee_id);
        self.issue(&path, &query.to_query_pairs()).await
    }

    /// Fetch one page of a committee's reports, optionally for a single cycle.
    pub async fn committee_reports_page(
        &self,
        committee_id: &str,
        query: &ReportsQuery,
    ) -> Result<Page<RawFiling>, OpenFecError> {
        let path = format!("/committee/{}/reports/", committee_id);
        self.issue(&path, &query.to_query_pairs()).await
    }

    /// Fetch the full history of a committee across all pages.
    pub async fn committee_history(
        &self,
        committee_id: &str,
    ) -> Result<Vec<HistoryRecord>, OpenFecError> {
        let per_page = self.per_page;
        Paginator::new(|page| {
            let query = HistoryQuery::default()
                .with_page(page)
                .with_per_page(per_page)
                .with_sort("cycle");
            async move { self.committee_history_page(committee_id, &query).await }
        })
        .collect_all()
        .await
    }

    /// Fetch every report a committee filed for one cycle across all pages.
    pub async fn committee_reports(
        &self,
        committee_id: &str,
        cycle: i32,
    ) -> Result<Vec<RawFiling>, OpenFecError> {
        let per_page = self.per_page;
        Paginator::new(|page| {
            let query = ReportsQuery::default()
                .with_cycle(cycle)
                .with_page(page)
                .with_per_page(per_page)
                .with_sort("coverage_end_date");
            async move { self.committee_reports_page(committee_id, &query).await }
        })
        .collect_all()
        .await
    }
}

fn snippet(body: &str) -> String {
    if body.chars().count() > BODY_SNIPPET_CHARS {
        let head: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
        format!("{}...", head)
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_truncates_on_char_boundary() {
        let body = "é".repeat(300);
        let s = snippet(&body);
        assert!(s.ends_with("..."));
        assert_eq!(s.chars().count(), BODY_SNIPPET_CHARS + 3);
    }

    #[test]
    fn snippet_keeps_short_bodies() {
        assert_eq!(snippet("not found"), "not found");
    }

    #[test]
    fn per_page_is_clamped() {
        let client = OpenFecClient::new("k".to_string()).unwrap().with_per_page(500);
        assert_eq!(client.per_page, MAX_PER_PAGE);
        let client = client.with_per_page(0);
        assert_eq!(client.per_page, 1);
    }
}
