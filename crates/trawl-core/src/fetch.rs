//! Retrying, paced page fetches on top of a raw [`Fetcher`].

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{AppError, FetchFailureKind};
use crate::identity::{Identity, IdentityPool};
use crate::throttle::RateLimiter;
use crate::traits::Fetcher;

/// Retry configuration with exponential backoff and jitter.
///
/// Delay before retry n (1-indexed) is `min(base * 2^(n-1), max_delay)`
/// plus, when enabled, uniform jitter in `[0, base)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.base_delay = base;
        self
    }

    /// Retries without waiting. Useful in tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Backoff to wait before retry `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        let base_ms = self.base_delay.as_millis() as u64;
        if !self.jitter || base_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..base_ms))
    }
}

/// Outcome of one logical fetch, after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageFetchResult {
    Success {
        body: String,
        status: u16,
    },
    Failure {
        kind: FetchFailureKind,
        retriable: bool,
        message: String,
        attempts: u32,
    },
}

impl PageFetchResult {
    fn failure(kind: FetchFailureKind, message: impl Into<String>, attempts: u32) -> Self {
        PageFetchResult::Failure {
            kind,
            retriable: kind.is_retriable(),
            message: message.into(),
            attempts,
        }
    }

    fn cancelled(url: &str, attempts: u32) -> Self {
        Self::failure(
            FetchFailureKind::Cancelled,
            format!("cancelled while fetching {url}"),
            attempts,
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PageFetchResult::Success { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PageFetchResult::Failure {
                kind: FetchFailureKind::Cancelled,
                ..
            }
        )
    }
}

/// Wraps a transport with pacing, retry and backoff.
///
/// Pacing is not owned here: every call takes the run's [`RateLimiter`] and
/// acquires a slot before each attempt, so the orchestrator decides the
/// pacing policy centrally.
#[derive(Clone)]
pub struct PageFetcher<F> {
    transport: F,
    policy: RetryPolicy,
}

impl<F: Fetcher> PageFetcher<F> {
    pub fn new(transport: F, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Fetch `url` with `identity`, retrying retriable failures.
    ///
    /// Cancellation is observed before each attempt, while waiting for a
    /// pacing slot, during the request, and between retries.
    pub async fn fetch(
        &self,
        url: &str,
        identity: &Identity,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
    ) -> PageFetchResult {
        if let Err(e) = Url::parse(url) {
            return PageFetchResult::failure(
                FetchFailureKind::InvalidUrl,
                format!("Invalid URL '{url}': {e}"),
                0,
            );
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            if cancel.is_cancelled() {
                return PageFetchResult::cancelled(url, attempt - 1);
            }
            tokio::select! {
                () = limiter.acquire(url) => {}
                () = cancel.cancelled() => return PageFetchResult::cancelled(url, attempt - 1),
            }

            let result = tokio::select! {
                r = self.transport.fetch(url, identity) => r,
                () = cancel.cancelled() => return PageFetchResult::cancelled(url, attempt),
            };

            let (kind, message) = match result {
                Ok(page) => match FetchFailureKind::from_status(page.status) {
                    None => {
                        return PageFetchResult::Success {
                            body: page.body,
                            status: page.status,
                        };
                    }
                    Some(kind) => (kind, format!("HTTP {} for {}", page.status, url)),
                },
                Err(AppError::FetchError { kind, message, .. }) => (kind, message),
                Err(other) => (FetchFailureKind::Network, other.to_string()),
            };

            if !kind.is_retriable() || attempt > self.policy.max_retries {
                tracing::warn!(%url, attempts = attempt, %kind, "Fetch failed");
                return PageFetchResult::failure(kind, message, attempt);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            tracing::debug!(
                %url,
                attempt,
                %kind,
                delay_ms = %delay.as_millis(),
                "Retrying after backoff"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return PageFetchResult::cancelled(url, attempt),
            }
        }
    }
}

/// Everything one request needs besides its URL: the retrying fetcher, the
/// identity pool, the run's pacing gate and its cancellation token.
pub struct FetchScope<'a, F> {
    fetcher: &'a PageFetcher<F>,
    identities: &'a IdentityPool,
    limiter: &'a RateLimiter,
    cancel: &'a CancellationToken,
}

impl<'a, F: Fetcher> FetchScope<'a, F> {
    pub fn new(
        fetcher: &'a PageFetcher<F>,
        identities: &'a IdentityPool,
        limiter: &'a RateLimiter,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            identities,
            limiter,
            cancel,
        }
    }

    /// Fetch `url` under a freshly chosen identity.
    pub async fn get(&self, url: &str) -> PageFetchResult {
        let identity = self.identities.choose();
        self.fetcher
            .fetch(url, identity, self.limiter, self.cancel)
            .await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockFetcher;
    use crate::throttle::ThrottleConfig;
    use crate::traits::FetchedPage;

    const URL: &str = "https://jobs.example.com/jobs/";

    fn limiter() -> RateLimiter {
        RateLimiter::new(ThrottleConfig::none())
    }

    fn identity() -> Identity {
        Identity::new("test-agent")
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let d = policy.delay_for_attempt(2);
            assert!(d >= Duration::from_secs(1) && d < Duration::from_millis(1500));
        }
    }

    #[tokio::test]
    async fn success_passes_body_through() {
        let mock = MockFetcher::new().with_page(URL, FetchedPage::ok("<html>ok</html>"));
        let fetcher = PageFetcher::new(mock, RetryPolicy::immediate(3));

        let result = fetcher
            .fetch(URL, &identity(), &limiter(), &CancellationToken::new())
            .await;
        assert_eq!(
            result,
            PageFetchResult::Success {
                body: "<html>ok</html>".into(),
                status: 200
            }
        );
    }

    #[tokio::test]
    async fn retriable_failures_are_retried_until_success() {
        let mock = MockFetcher::new()
            .with_page(URL, FetchedPage::with_status(503))
            .with_error(URL, AppError::fetch(FetchFailureKind::Timeout, "slow"))
            .with_page(URL, FetchedPage::ok("finally"));
        let fetcher = PageFetcher::new(mock.clone(), RetryPolicy::immediate(3));

        let result = fetcher
            .fetch(URL, &identity(), &limiter(), &CancellationToken::new())
            .await;
        assert!(result.is_success());
        assert_eq!(mock.calls_to(URL), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let mock = MockFetcher::new().always(URL, FetchedPage::with_status(429));
        let fetcher = PageFetcher::new(mock.clone(), RetryPolicy::immediate(3));

        let result = fetcher
            .fetch(URL, &identity(), &limiter(), &CancellationToken::new())
            .await;
        match result {
            PageFetchResult::Failure {
                kind,
                retriable,
                attempts,
                ..
            } => {
                assert_eq!(kind, FetchFailureKind::RateLimited);
                assert!(retriable);
                assert_eq!(attempts, 4);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(mock.calls_to(URL), 4);
    }

    #[tokio::test]
    async fn client_errors_return_immediately() {
        let mock = MockFetcher::new().always(URL, FetchedPage::with_status(404));
        let fetcher = PageFetcher::new(mock.clone(), RetryPolicy::immediate(3));

        let result = fetcher
            .fetch(URL, &identity(), &limiter(), &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            PageFetchResult::Failure {
                kind: FetchFailureKind::ClientError(404),
                retriable: false,
                attempts: 1,
                ..
            }
        ));
        assert_eq!(mock.calls_to(URL), 1);
    }

    #[tokio::test]
    async fn malformed_url_never_reaches_transport() {
        let mock = MockFetcher::new();
        let fetcher = PageFetcher::new(mock.clone(), RetryPolicy::immediate(3));

        let result = fetcher
            .fetch("not a url", &identity(), &limiter(), &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            PageFetchResult::Failure {
                kind: FetchFailureKind::InvalidUrl,
                attempts: 0,
                ..
            }
        ));
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_between_retries() {
        let mock = MockFetcher::new().always(URL, FetchedPage::with_status(500));
        let policy = RetryPolicy::immediate(5).with_base_delay(Duration::from_secs(60));
        let fetcher = PageFetcher::new(mock.clone(), RetryPolicy {
            max_delay: Duration::from_secs(60),
            ..policy
        });
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            }
        };
        let identity = identity();
        let limiter = limiter();
        let (result, ()) = tokio::join!(
            fetcher.fetch(URL, &identity, &limiter, &cancel),
            canceller
        );

        assert!(result.is_cancelled());
        assert_eq!(mock.calls_to(URL), 1);
    }

    #[tokio::test]
    async fn already_cancelled_makes_no_request() {
        let mock = MockFetcher::new();
        let fetcher = PageFetcher::new(mock.clone(), RetryPolicy::immediate(3));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = fetcher.fetch(URL, &identity(), &limiter(), &cancel).await;
        assert!(result.is_cancelled());
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn identity_is_forwarded() {
        let mock = MockFetcher::new().with_page(URL, FetchedPage::ok("x"));
        let fetcher = PageFetcher::new(mock.clone(), RetryPolicy::immediate(0));

        fetcher
            .fetch(URL, &identity(), &limiter(), &CancellationToken::new())
            .await;
        assert_eq!(mock.calls()[0].1, "test-agent");
    }
}
