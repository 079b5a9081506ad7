//! Request pacing shared by every fetch in a run.
//!
//! A [`RateLimiter`] is a fixed-delay gate per lane. Callers `acquire` a slot
//! before each request; the limiter reserves the next slot under its lock and
//! sleeps outside it, so concurrent workers are spaced out instead of all
//! waking at once. Total request rate per lane is bounded regardless of how
//! many workers share the limiter.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use trawl_core::throttle::{Lane, RateLimiter, ThrottleConfig};
//!
//! # async fn run() {
//! let limiter = RateLimiter::new(
//!     ThrottleConfig::new(Duration::from_secs(1))
//!         .with_jitter(Duration::from_millis(500))
//!         .with_lane(Lane::PerHost),
//! );
//! limiter.acquire("https://pinoyjobs.ph/jobs/page/1/").await;
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use url::Url;

/// How requests are grouped for pacing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lane {
    /// One lane for every request.
    #[default]
    Global,
    /// One lane per scheme + host + port.
    PerHost,
}

/// Configuration for the rate limiter.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests in the same lane.
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter]).
    /// Set to `Duration::ZERO` to disable.
    pub jitter: Duration,

    pub lane: Lane,
}

impl ThrottleConfig {
    /// Create a new config with the given delay, no jitter, one global lane.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
            lane: Lane::Global,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_lane(mut self, lane: Lane) -> Self {
        self.lane = lane;
        self
    }

    /// No pacing at all. Useful in tests.
    pub fn none() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Compute the effective delay for a single wait (delay + random jitter).
    fn effective_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..self.jitter.as_millis().max(1) as u64);
        self.delay + Duration::from_millis(jitter_ms)
    }
}

impl Default for ThrottleConfig {
    /// 1 second delay, 500ms jitter, global lane.
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            jitter: Duration::from_millis(500),
            lane: Lane::Global,
        }
    }
}

/// Fixed-delay gate. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RateLimiter {
    config: ThrottleConfig,
    /// Earliest instant the next request may start, per lane key.
    next_slot: Arc<Mutex<HashMap<String, Instant>>>,
}

impl RateLimiter {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            next_slot: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lane_key(&self, url: &str) -> String {
        match self.config.lane {
            Lane::Global => String::new(),
            Lane::PerHost => Self::domain_key(url).unwrap_or_default(),
        }
    }

    /// Extract the domain key from a URL (scheme://host:port).
    fn domain_key(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        let host = url.host_str()?;
        let port = url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", url.scheme(), host, port))
    }

    /// Wait until this request's slot in its lane comes up.
    ///
    /// The first request in a lane goes through immediately.
    pub async fn acquire(&self, url: &str) {
        let key = self.lane_key(url);
        let wait = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match slots.get(&key) {
                Some(&next) if next > now => next,
                _ => now,
            };
            slots.insert(key, slot + self.config.effective_delay());
            slot.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            tracing::debug!(%url, sleep_ms = %wait.as_millis(), "Throttling request");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_key_extracts_correctly() {
        assert_eq!(
            RateLimiter::domain_key("https://example.com/path?q=1"),
            Some("https://example.com:443".to_string())
        );
        assert_eq!(
            RateLimiter::domain_key("http://example.com:8080/page"),
            Some("http://example.com:8080".to_string())
        );
        assert_eq!(RateLimiter::domain_key("not-a-url"), None);
    }

    #[test]
    fn effective_delay_with_jitter_is_bounded() {
        let config =
            ThrottleConfig::new(Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let d = config.effective_delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn first_request_is_immediate() {
        let limiter = RateLimiter::new(ThrottleConfig::new(Duration::from_secs(5)));
        let start = Instant::now();
        limiter.acquire("http://example.com/a").await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn global_lane_spaces_all_hosts() {
        let limiter = RateLimiter::new(ThrottleConfig::new(Duration::from_millis(100)));
        let start = Instant::now();
        limiter.acquire("http://example.com/a").await;
        limiter.acquire("http://other.com/b").await;
        assert!(
            start.elapsed() >= Duration::from_millis(100),
            "second request should wait, elapsed: {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn per_host_lane_does_not_delay_other_hosts() {
        let limiter = RateLimiter::new(
            ThrottleConfig::new(Duration::from_millis(300)).with_lane(Lane::PerHost),
        );
        let start = Instant::now();
        limiter.acquire("http://example.com/a").await;
        limiter.acquire("http://other.com/a").await;
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn concurrent_callers_are_spaced() {
        let limiter = RateLimiter::new(ThrottleConfig::new(Duration::from_millis(50)));
        let start = Instant::now();
        futures::future::join_all((0..4).map(|_| limiter.acquire("http://example.com/"))).await;
        // Slots at 0, 50, 100, 150ms.
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn default_config_is_sensible() {
        let config = ThrottleConfig::default();
        assert_eq!(config.delay, Duration::from_secs(1));
        assert_eq!(config.jitter, Duration::from_millis(500));
        assert_eq!(config.lane, Lane::Global);
    }
}
