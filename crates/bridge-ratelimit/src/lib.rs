//! Per-key rate limiting with an adaptive, feedback-driven multiplier.
//!
//! Each named [`RateLimiter`] tracks a per-minute bucket and, if configured,
//! a per-second bucket per key, both guarded by the same exclusive lock so
//! the check-then-increment sequence is atomic. Callers report outcomes back
//! via [`RateLimiter::record_success`] / [`RateLimiter::record_error`]; the
//! limiter uses that feedback to scale its caps up or down without parsing
//! any transport-level status codes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

const MULTIPLIER_MIN: f64 = 0.5;
const MULTIPLIER_MAX: f64 = 1.2;
const MULTIPLIER_STEP_UP: f64 = 0.01;
const MULTIPLIER_STEP_DOWN: f64 = 0.10;
const SUCCESS_THRESHOLD: u32 = 100;
const ERROR_CEILING_FOR_INCREASE: u32 = 5;
const ERROR_THRESHOLD_FOR_DECREASE: u32 = 3;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum RateLimiterError {
    #[error("rate limiter wait exceeded {0:?} for key {1}")]
    Timeout(Duration, String),
}

#[derive(Debug, Clone)]
struct Bucket {
    requests: u32,
    reset_time: Instant,
    window: Duration,
}

impl Bucket {
    fn new(window: Duration) -> Self {
        Self {
            requests: 0,
            reset_time: Instant::now() + window,
            window,
        }
    }

    fn roll_if_expired(&mut self, now: Instant) {
        if now >= self.reset_time {
            self.requests = 0;
            self.reset_time = now + self.window;
        }
    }
}

/// Configuration for a [`RateLimiter`]: either cap may be omitted to disable
/// that tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimiterConfig {
    pub requests_per_second: Option<f64>,
    pub requests_per_minute: Option<u32>,
}

/// A named limiter holding per-key minute and second buckets plus a shared
/// adaptive multiplier in `[0.5, 1.2]`.
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    minute_buckets: Mutex<HashMap<String, Bucket>>,
    second_buckets: Mutex<HashMap<String, Bucket>>,
    multiplier_bits: AtomicU32,
    success_count: AtomicU32,
    error_count: AtomicU32,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self {
            name: name.into(),
            config,
            minute_buckets: Mutex::new(HashMap::new()),
            second_buckets: Mutex::new(HashMap::new()),
            multiplier_bits: AtomicU32::new(1.0f32.to_bits()),
            success_count: AtomicU32::new(0),
            error_count: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adaptive_multiplier(&self) -> f64 {
        f32::from_bits(self.multiplier_bits.load(Ordering::Relaxed)) as f64
    }

    fn set_multiplier(&self, value: f64) {
        self.multiplier_bits
            .store((value as f32).to_bits(), Ordering::Relaxed);
    }

    /// Attempts to consume one unit of capacity for `key`. Checks the minute
    /// bucket and, if configured, the second bucket, under the same
    /// exclusive critical section so the two never observe an inconsistent
    /// state relative to each other.
    pub fn acquire(&self, key: &str) -> bool {
        let multiplier = self.adaptive_multiplier();
        let now = Instant::now();

        // Both locks are held for the whole call (always in this order) so a
        // second-cap rejection never leaves the minute bucket incremented:
        // every cap is checked before either bucket is committed to.
        let mut minute_buckets = self.minute_buckets.lock();
        let mut second_buckets = self.second_buckets.lock();

        if let Some(cap) = self.config.requests_per_minute {
            let bucket = minute_buckets
                .entry(key.to_string())
                .or_insert_with(|| Bucket::new(Duration::from_secs(60)));
            bucket.roll_if_expired(now);

            if bucket.requests as f64 >= cap as f64 * multiplier {
                return false;
            }
        }

        if let Some(cap) = self.config.requests_per_second {
            let bucket = second_buckets
                .entry(key.to_string())
                .or_insert_with(|| Bucket::new(Duration::from_secs(1)));
            bucket.roll_if_expired(now);

            if bucket.requests as f64 >= cap * multiplier {
                return false;
            }
        }

        if self.config.requests_per_minute.is_some() {
            minute_buckets
                .get_mut(key)
                .expect("bucket was just inserted above")
                .requests += 1;
        }
        if self.config.requests_per_second.is_some() {
            second_buckets
                .get_mut(key)
                .expect("bucket was just inserted above")
                .requests += 1;
        }

        true
    }

    /// Polls [`Self::acquire`] every 100ms until it succeeds or `max_wait`
    /// elapses, in which case it returns [`RateLimiterError::Timeout`].
    pub async fn wait_if_needed(
        &self,
        key: &str,
        max_wait: Duration,
    ) -> Result<(), RateLimiterError> {
        let deadline = Instant::now() + max_wait;
        loop {
            if self.acquire(key) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RateLimiterError::Timeout(max_wait, key.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Same as [`Self::wait_if_needed`] but with the design-default 60s
    /// max wait.
    pub async fn wait_if_needed_default(&self, key: &str) -> Result<(), RateLimiterError> {
        self.wait_if_needed(key, DEFAULT_MAX_WAIT).await
    }

    /// Non-erroring variant: returns `false` on timeout instead.
    pub async fn wait_if_needed_safe(&self, key: &str, max_wait: Duration) -> bool {
        self.wait_if_needed(key, max_wait).await.is_ok()
    }

    /// Records a successful call. After more than 100 successes with fewer
    /// than 5 errors since the last adjustment, raises the multiplier by
    /// 0.01 (capped at 1.2) and resets both counters.
    pub fn record_success(&self) {
        let successes = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
        let errors = self.error_count.load(Ordering::Relaxed);

        if successes > SUCCESS_THRESHOLD && errors < ERROR_CEILING_FOR_INCREASE {
            let next = (self.adaptive_multiplier() + MULTIPLIER_STEP_UP).min(MULTIPLIER_MAX);
            self.set_multiplier(next);
            self.success_count.store(0, Ordering::Relaxed);
            self.error_count.store(0, Ordering::Relaxed);
            tracing::debug!(limiter = %self.name, multiplier = next, "rate limiter multiplier increased");
        }
    }

    /// Records a failed call. After more than 3 errors since the last
    /// adjustment, drops the multiplier by 0.10 (floored at 0.5) and resets
    /// both counters.
    pub fn record_error(&self) {
        let errors = self.error_count.fetch_add(1, Ordering::Relaxed) + 1;

        if errors > ERROR_THRESHOLD_FOR_DECREASE {
            let next = (self.adaptive_multiplier() - MULTIPLIER_STEP_DOWN).max(MULTIPLIER_MIN);
            self.set_multiplier(next);
            self.success_count.store(0, Ordering::Relaxed);
            self.error_count.store(0, Ordering::Relaxed);
            tracing::debug!(limiter = %self.name, multiplier = next, "rate limiter multiplier decreased");
        }
    }

    /// Evicts buckets whose reset time is older than `now - max_age`.
    /// Called from the orchestrator's cleanup loop to keep the per-channel
    /// key space bounded.
    pub fn clear_old_buckets(&self, max_age: Duration) {
        let cutoff = Instant::now()
            .checked_sub(max_age)
            .unwrap_or_else(Instant::now);
        self.minute_buckets
            .lock()
            .retain(|_, b| b.reset_time > cutoff);
        self.second_buckets
            .lock()
            .retain(|_, b| b.reset_time > cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_respects_per_minute_cap() {
        let limiter = RateLimiter::new(
            "test",
            RateLimiterConfig {
                requests_per_second: None,
                requests_per_minute: Some(3),
            },
        );
        assert!(limiter.acquire("k"));
        assert!(limiter.acquire("k"));
        assert!(limiter.acquire("k"));
        assert!(!limiter.acquire("k"));
    }

    #[test]
    fn acquire_is_per_key() {
        let limiter = RateLimiter::new(
            "test",
            RateLimiterConfig {
                requests_per_second: None,
                requests_per_minute: Some(1),
            },
        );
        assert!(limiter.acquire("a"));
        assert!(limiter.acquire("b"));
        assert!(!limiter.acquire("a"));
    }

    #[test]
    fn adaptive_multiplier_drops_after_four_errors() {
        let limiter = RateLimiter::new("test", RateLimiterConfig::default());
        assert_eq!(limiter.adaptive_multiplier(), 1.0);
        for _ in 0..4 {
            limiter.record_error();
        }
        assert!((limiter.adaptive_multiplier() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn adaptive_multiplier_floors_at_half() {
        let limiter = RateLimiter::new("test", RateLimiterConfig::default());
        for _ in 0..100 {
            for _ in 0..4 {
                limiter.record_error();
            }
        }
        assert!(limiter.adaptive_multiplier() >= MULTIPLIER_MIN);
        assert!((limiter.adaptive_multiplier() - MULTIPLIER_MIN).abs() < 1e-6);
    }

    #[test]
    fn adaptive_multiplier_rises_after_enough_successes() {
        let limiter = RateLimiter::new("test", RateLimiterConfig::default());
        for _ in 0..101 {
            limiter.record_success();
        }
        assert!((limiter.adaptive_multiplier() - 1.01).abs() < 1e-6);
    }

    #[tokio::test]
    async fn wait_if_needed_times_out() {
        let limiter = RateLimiter::new(
            "test",
            RateLimiterConfig {
                requests_per_second: None,
                requests_per_minute: Some(0),
            },
        );
        let result = limiter
            .wait_if_needed("k", Duration::from_millis(150))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn clear_old_buckets_evicts_expired() {
        let limiter = RateLimiter::new(
            "test",
            RateLimiterConfig {
                requests_per_second: Some(10.0),
                requests_per_minute: None,
            },
        );
        limiter.acquire("k");
        tokio::time::sleep(Duration::from_millis(1100)).await;
        limiter.clear_old_buckets(Duration::from_secs(0));
        assert_eq!(limiter.second_buckets.lock().len(), 0);
    }
}
