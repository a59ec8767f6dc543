use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::metrics::RETRY_ATTEMPTS;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Retry settings as they appear in the `[retry]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Length of one backoff unit. The exponent and jitter are counted in units.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_min_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Retry policy applied around a single external call.
///
/// Attempt `n` (1-based) that fails with a retryable error is followed by a
/// delay of `clamp(2^n + uniform(-n, n), min, max)` units. The operation runs
/// at most `max_attempts + 1` times and the last error is returned unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    min_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Policy with the default one second unit and 1s..30s bounds.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Scale the backoff unit. Bounds are scaled along with it.
    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.min_delay = base;
        self.max_delay = base * 30;
        self.base_delay = base;
        self
    }

    pub fn with_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_delay = min;
        self.max_delay = max;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after failed attempt `attempt` given a jitter sample in units.
    pub fn backoff_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let units = 2f64.powi(attempt.min(30) as i32) + jitter;
        let raw = self.base_delay.mul_f64(units.max(0.0));
        raw.clamp(self.min_delay, self.max_delay)
    }

    /// Jitter sample drawn uniformly from `[-attempt, attempt]`.
    fn sample_jitter(attempt: u32) -> f64 {
        let bound = attempt as f64;
        rand::thread_rng().gen_range(-bound..=bound)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt <= self.max_attempts => {
                    let delay = self.backoff_delay(attempt, Self::sample_jitter(attempt));
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after failure"
                    );
                    RETRY_ATTEMPTS.with_label_values(&[operation]).inc();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Run `op` with the default policy and the given retry count.
pub async fn with_retry<T, E, F, Fut>(operation: &str, op: F, max_attempts: u32) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    RetryPolicy::new(max_attempts).run(operation, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky(u32),
        Fatal,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Flaky(n) => write!(f, "flaky #{}", n),
                TestError::Fatal => write!(f, "fatal"),
            }
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Flaky(_))
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_backoff_delay_is_clamped() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.backoff_delay(1, 0.0), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2, -2.0), Duration::from_secs(2));
        // 2^1 - 1 = 1 unit, exactly the floor
        assert_eq!(policy.backoff_delay(1, -1.0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(5, 5.0), Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(20, 0.0), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_attempt_bounds() {
        for attempt in 1..6 {
            for _ in 0..100 {
                let j = RetryPolicy::sample_jitter(attempt);
                assert!(j >= -(attempt as f64) && j <= attempt as f64);
            }
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<&str, TestError> = fast_policy(3)
            .run("flaky", || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TestError::Flaky(n))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), TestError> = fast_policy(2)
            .run("always-flaky", || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(TestError::Flaky(n)) }
            })
            .await;

        // max_attempts + 1 tries, the error of the final try surfaces
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Err(TestError::Flaky(3)));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), TestError> = fast_policy(5)
            .run("fatal", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_elapsed_delay_respects_floor() {
        let policy = RetryPolicy::new(2).with_bounds(Duration::from_millis(5), Duration::from_millis(5));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let started = Instant::now();

        let _: Result<(), TestError> = policy
            .run("timed", || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TestError::Flaky(n))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        // Two retries, each pinned to exactly 5ms
        assert!(started.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_with_retry_zero_attempts_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), TestError> = with_retry(
            "once",
            || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(TestError::Flaky(n)) }
            },
            0,
        )
        .await;

        assert_eq!(result, Err(TestError::Flaky(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_config_defaults_from_toml() {
        let config: RetryConfig = toml::from_str("max_attempts = 5").unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30_000);

        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts(), 5);
    }
}
