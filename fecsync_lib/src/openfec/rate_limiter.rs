//! Rate limiter and retry logic for OpenFEC API requests.
//!
//! Provides a pacing limiter that keeps requests under the OpenFEC hourly
//! budget (1,000 req/hr free tier, default 900 with safety margin) by combining
//! a fixed minimum spacing between requests with a sliding-window cap, plus an
//! exponential-backoff retry helper for 429 responses and network failures.
//!
//! One `RateLimiter` must be shared (via `Arc`) by every caller drawing on the
//! same API key. Independent limiters per worker would each believe they own
//! the whole budget.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use super::error::OpenFecError;

/// Default hourly budget (10% safety margin below the 1,000 free-tier limit).
pub const DEFAULT_MAX_REQUESTS: u64 = 900;

/// Default sliding window duration.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

struct LimiterState {
    timestamps: VecDeque<Instant>,
    last_request: Option<Instant>,
}

/// Pacing limiter for the OpenFEC API.
///
/// `acquire()` blocks until both conditions hold: at least `min_interval` has
/// passed since the previous request, and fewer than `max_requests` requests
/// were issued in the trailing `window_duration`.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    max_requests: u64,
    window_duration: Duration,
    min_interval: Duration,
    tracker: RequestTracker,
}

impl RateLimiter {
    /// Create a limiter with an explicit budget, window and minimum spacing.
    pub fn new(max_requests: u64, window_duration: Duration, min_interval: Duration) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                timestamps: VecDeque::with_capacity(max_requests.min(4096) as usize),
                last_request: None,
            }),
            max_requests,
            window_duration,
            min_interval,
            tracker: RequestTracker::new(),
        }
    }

    /// Create a limiter whose spacing spreads the budget evenly over the window.
    pub fn evenly_paced(max_requests: u64, window_duration: Duration) -> Self {
        let divisor = u32::try_from(max_requests.max(1)).unwrap_or(u32::MAX);
        let min_interval = window_duration / divisor;
        Self::new(max_requests, window_duration, min_interval)
    }

    /// Wait until a request slot is available, then record the timestamp.
    pub async fn acquire(&self) {
        loop {
            let now = Instant::now();
            let mut state = self.state.lock().await;

            // Evict entries older than the window
            if let Some(cutoff) = now.checked_sub(self.window_duration) {
                while state.timestamps.front().is_some_and(|&t| t < cutoff) {
                    state.timestamps.pop_front();
                }
            }

            let spacing_wait = state
                .last_request
                .map(|last| match last.checked_add(self.min_interval) {
                    Some(ready) => ready.saturating_duration_since(now),
                    None => self.min_interval,
                })
                .unwrap_or(Duration::ZERO);

            let window_wait = if (state.timestamps.len() as u64) < self.max_requests {
                Duration::ZERO
            } else {
                state
                    .timestamps
                    .front()
                    .map(|&oldest| match oldest.checked_add(self.window_duration) {
                        Some(expiry) => expiry.saturating_duration_since(now),
                        None => self.window_duration,
                    })
                    .unwrap_or(Duration::ZERO)
            };

            let wait = spacing_wait.max(window_wait);
            if wait.is_zero() {
                state.timestamps.push_back(now);
                state.last_request = Some(now);
                return;
            }

            // Drop lock before sleeping
            drop(state);
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limiter pacing");
            sleep(wait).await;
        }
    }

    /// Non-blocking snapshot of remaining request budget in the current window.
    ///
    /// Returns `None` if the lock is contended (callers should treat as "unknown").
    pub fn remaining_budget(&self) -> Option<u64> {
        match self.state.try_lock() {
            Ok(state) => {
                let now = Instant::now();
                let active = match now.checked_sub(self.window_duration) {
                    Some(cutoff) => state.timestamps.iter().filter(|&&t| t >= cutoff).count(),
                    None => state.timestamps.len(),
                } as u64;
                Some(self.max_requests.saturating_sub(active))
            }
            Err(_) => None,
        }
    }

    /// Access the request tracker for recording outcomes.
    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// The configured max requests per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// The configured minimum spacing between requests.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::evenly_paced(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

/// Backoff schedule for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Random jitter in `[0, max_jitter)` added to each sleep. Zero disables it.
    pub max_jitter: Duration,
}

impl RetryPolicy {
    /// Deterministic part of the backoff before retry number `attempt` (0-based):
    /// `base_delay * multiplier^attempt`, capped at one hour.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= MAX_BACKOFF.as_secs_f64() {
            return MAX_BACKOFF;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.max_jitter.as_millis().max(1) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_jitter: Duration::from_secs(10),
        }
    }
}

/// Atomic counters tracking API request outcomes.
pub struct RequestTracker {
    pub(crate) requests_made: AtomicU64,
    pub(crate) requests_succeeded: AtomicU64,
    pub(crate) requests_rate_limited: AtomicU64,
    pub(crate) requests_network_failed: AtomicU64,
    pub(crate) requests_failed: AtomicU64,
    /// Cumulative backoff time in milliseconds.
    pub(crate) total_backoff_ms: AtomicU64,
}

impl RequestTracker {
    fn new() -> Self {
        Self {
            requests_made: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            requests_rate_limited: AtomicU64::new(0),
            requests_network_failed: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            total_backoff_ms: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.requests_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_failure(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.requests_network_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backoff(&self, duration: Duration) {
        self.total_backoff_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Snapshot the current counters.
    pub fn summary(&self) -> TrackerSummary {
        TrackerSummary {
            requests_made: self.requests_made.load(Ordering::Relaxed),
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_rate_limited: self.requests_rate_limited.load(Ordering::Relaxed),
            requests_network_failed: self.requests_network_failed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            total_backoff_secs: self.total_backoff_ms.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Immutable snapshot of tracker counters for display.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackerSummary {
    pub requests_made: u64,
    pub requests_succeeded: u64,
    pub requests_rate_limited: u64,
    pub requests_network_failed: u64,
    pub requests_failed: u64,
    pub total_backoff_secs: f64,
}

/// Execute an async operation with rate limiting and exponential backoff.
///
/// - Calls `rate_limiter.acquire()` before each attempt.
/// - On `RateLimitExceeded` or `NetworkFailure`: sleeps
///   `policy.backoff_delay(attempt)` plus jitter, then retries, up to
///   `policy.max_retries` retries. The final error reports the attempt count.
/// - Any other error is returned immediately.
/// - Records all outcomes on the tracker.
pub async fn with_retry<F, Fut, T>(
    rate_limiter: &RateLimiter,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, OpenFecError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, OpenFecError>>,
{
    let tracker = rate_limiter.tracker();
    let mut last_error = OpenFecError::RateLimitExceeded { attempts: 0 };

    for attempt in 0..=policy.max_retries {
        rate_limiter.acquire().await;

        match operation().await {
            Ok(val) => {
                tracker.record_success();
                return Ok(val);
            }
            Err(e) if e.is_transient() => {
                last_error = match e {
                    OpenFecError::RateLimitExceeded { .. } => {
                        tracker.record_rate_limited();
                        OpenFecError::RateLimitExceeded {
                            attempts: attempt + 1,
                        }
                    }
                    other => {
                        tracker.record_network_failure();
                        other
                    }
                };

                if attempt == policy.max_retries {
                    break;
                }

                let total_wait = policy.backoff_delay(attempt) + policy.jitter();
                tracing::warn!(
                    attempt = attempt + 1,
                    wait_ms = total_wait.as_millis() as u64,
                    "transient OpenFEC failure, backing off: {}",
                    last_error
                );
                tracker.record_backoff(total_wait);
                sleep(total_wait).await;
            }
            Err(e) => {
                tracker.record_failure();
                return Err(e);
            }
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn quick_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn acquire_under_limit() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60), Duration::ZERO);

        // Should all return immediately when under budget
        for _ in 0..10 {
            limiter.acquire().await;
        }

        assert_eq!(limiter.remaining_budget(), Some(0));
    }

    #[tokio::test]
    async fn acquire_at_limit_blocks() {
        tokio::time::pause();

        let limiter = Arc::new(RateLimiter::new(3, Duration::from_secs(10), Duration::ZERO));

        // Fill the window
        for _ in 0..3 {
            limiter.acquire().await;
        }

        // Next acquire should block -- spawn it and verify it doesn't complete immediately
        let limiter_clone = Arc::clone(&limiter);
        let handle = tokio::spawn(async move {
            limiter_clone.acquire().await;
        });

        // Advance time just short of expiry -- task should still be pending
        tokio::time::advance(Duration::from_secs(9)).await;
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        // Advance past the window -- task should complete
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn acquire_enforces_min_interval() {
        tokio::time::pause();

        let limiter = RateLimiter::new(100, Duration::from_secs(3600), Duration::from_secs(4));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // First is immediate, the next two each wait out the spacing
        assert!(start.elapsed() >= Duration::from_secs(8));
        assert!(start.elapsed() < Duration::from_secs(9));
    }

    #[tokio::test]
    async fn window_expiry() {
        tokio::time::pause();

        let limiter = RateLimiter::new(2, Duration::from_secs(5), Duration::ZERO);

        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.remaining_budget(), Some(0));

        // Advance past the window
        tokio::time::advance(Duration::from_secs(6)).await;

        // Should have full budget again
        assert_eq!(limiter.remaining_budget(), Some(2));

        // And acquire should work immediately
        limiter.acquire().await;
        assert_eq!(limiter.remaining_budget(), Some(1));
    }

    #[tokio::test]
    async fn huge_window_and_spacing_do_not_overflow() {
        tokio::time::pause();

        let limiter = Arc::new(RateLimiter::new(1, Duration::MAX, Duration::MAX));
        limiter.acquire().await;
        assert_eq!(limiter.remaining_budget(), Some(0));

        let limiter_clone = Arc::clone(&limiter);
        let handle = tokio::spawn(async move {
            limiter_clone.acquire().await;
        });
        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn default_is_evenly_paced_with_margin() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.max_requests(), 900);
        assert_eq!(limiter.min_interval(), Duration::from_secs(4));
    }

    #[test]
    fn backoff_delay_is_exponential() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            multiplier: 3.0,
            max_jitter: Duration::ZERO,
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(6));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(18));
    }

    #[test]
    fn backoff_delay_is_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(60),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn tracker_counters() {
        let tracker = RequestTracker::new();

        tracker.record_success();
        tracker.record_success();
        tracker.record_rate_limited();
        tracker.record_network_failure();
        tracker.record_failure();
        tracker.record_backoff(Duration::from_secs(60));

        let summary = tracker.summary();
        assert_eq!(summary.requests_made, 5);
        assert_eq!(summary.requests_succeeded, 2);
        assert_eq!(summary.requests_rate_limited, 1);
        assert_eq!(summary.requests_network_failed, 1);
        assert_eq!(summary.requests_failed, 1);
        assert!((summary.total_backoff_secs - 60.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn with_retry_succeeds_first_attempt() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60), Duration::ZERO);
        let result = with_retry(&limiter, &quick_policy(3), || async {
            Ok::<_, OpenFecError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);

        let summary = limiter.tracker().summary();
        assert_eq!(summary.requests_made, 1);
        assert_eq!(summary.requests_succeeded, 1);
    }

    #[tokio::test]
    async fn with_retry_retries_on_rate_limit() {
        tokio::time::pause();

        let limiter = RateLimiter::new(100, Duration::from_secs(3600), Duration::ZERO);
        let attempt = Arc::new(AtomicU64::new(0));
        let attempt_clone = Arc::clone(&attempt);

        let result = with_retry(&limiter, &quick_policy(3), move || {
            let attempt = Arc::clone(&attempt_clone);
            async move {
                let n = attempt.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(OpenFecError::RateLimitExceeded { attempts: 1 })
                } else {
                    Ok(99)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 99);

        let summary = limiter.tracker().summary();
        assert_eq!(summary.requests_succeeded, 1);
        assert_eq!(summary.requests_rate_limited, 2);
        // 100ms + 200ms
        assert!((summary.total_backoff_secs - 0.3).abs() < 0.01);
    }

    #[tokio::test]
    async fn with_retry_retries_network_failures() {
        tokio::time::pause();

        let limiter = RateLimiter::new(100, Duration::from_secs(3600), Duration::ZERO);
        let attempt = Arc::new(AtomicU64::new(0));
        let attempt_clone = Arc::clone(&attempt);

        let result = with_retry(&limiter, &quick_policy(2), move || {
            let attempt = Arc::clone(&attempt_clone);
            async move {
                if attempt.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(OpenFecError::NetworkFailure("connection reset".to_string()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(limiter.tracker().summary().requests_network_failed, 1);
    }

    #[tokio::test]
    async fn with_retry_propagates_upstream_errors_without_retry() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60), Duration::ZERO);
        let result = with_retry(&limiter, &quick_policy(3), || async {
            Err::<i32, _>(OpenFecError::UpstreamError {
                status: 500,
                body: "boom".to_string(),
            })
        })
        .await;

        assert!(matches!(
            result,
            Err(OpenFecError::UpstreamError { status: 500, .. })
        ));

        let summary = limiter.tracker().summary();
        assert_eq!(summary.requests_made, 1);
        assert_eq!(summary.requests_failed, 1);
    }

    #[tokio::test]
    async fn with_retry_exhausts_retries() {
        tokio::time::pause();

        let limiter = RateLimiter::new(100, Duration::from_secs(3600), Duration::ZERO);
        let result = with_retry(&limiter, &quick_policy(2), || async {
            Err::<i32, _>(OpenFecError::RateLimitExceeded { attempts: 1 })
        })
        .await;

        assert!(matches!(
            result,
            Err(OpenFecError::RateLimitExceeded { attempts: 3 })
        ));

        let summary = limiter.tracker().summary();
        // 1 initial + 2 retries = 3 rate_limited
        assert_eq!(summary.requests_rate_limited, 3);
    }

    #[tokio::test]
    async fn with_retry_exhausts_network_retries() {
        tokio::time::pause();

        let limiter = RateLimiter::new(100, Duration::from_secs(3600), Duration::ZERO);
        let result = with_retry(&limiter, &quick_policy(1), || async {
            Err::<i32, _>(OpenFecError::NetworkFailure("timed out".to_string()))
        })
        .await;

        assert!(matches!(result, Err(OpenFecError::NetworkFailure(_))));
        assert_eq!(limiter.tracker().summary().requests_network_failed, 2);
    }
}
