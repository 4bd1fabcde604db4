//! Retry driver
//!
//! Every upstream call is expressed as an operation that classifies its own
//! outcome into an [`Attempt`]. [`execute`] drives the operation until it
//! succeeds, aborts, or runs out of attempts, sleeping with exponential
//! backoff in between.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

use crate::config::RetryConfig;
use crate::metrics::UPSTREAM_RETRIES_TOTAL;

/// Outcome of a single attempt, as judged by the operation itself
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Done, hand the value back to the caller
    Success(T),
    /// Transient failure, try again after a backoff delay
    Retry(E),
    /// Permanent failure, give up immediately
    Abort(E),
}

/// Whether a failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retry,
    Abort,
}

/// Retry parameters for one upstream
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Multiplier applied per further attempt
    pub factor: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Randomize each delay within `[delay, 2 * delay)`, capped at `max_delay`
    pub jitter: bool,
}

impl RetryPolicy {
    /// Deterministic part of the delay after `attempt` failed (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay to sleep after `attempt` failed, jitter included
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if !self.jitter {
            return backoff;
        }

        let scale: f64 = rand::thread_rng().gen_range(1.0..2.0);
        backoff.mul_f64(scale).min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            factor: config.factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }
}

/// Run `operation` under `policy`
///
/// `operation` receives the 1-based attempt number. On exhaustion the error
/// of the last attempt is returned unchanged.
///
/// # Arguments
/// * `policy` - Attempt cap and backoff parameters
/// * `upstream` - Label used in logs and metrics
/// * `operation` - Performs one attempt and classifies its outcome
pub async fn execute<T, E, F, Fut>(policy: &RetryPolicy, upstream: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Attempt::Success(value) => return Ok(value),
            Attempt::Abort(error) => {
                tracing::debug!(upstream, attempt, error = %error, "Upstream call aborted, not retrying");
                return Err(error);
            }
            Attempt::Retry(error) if attempt >= max_attempts => {
                tracing::warn!(upstream, attempt, error = %error, "Upstream call failed, retries exhausted");
                return Err(error);
            }
            Attempt::Retry(error) => {
                let delay = policy.delay_for(attempt);
                UPSTREAM_RETRIES_TOTAL.with_label_values(&[upstream]).inc();
                tracing::info!(
                    upstream,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying upstream call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Classify a non-success HTTP status
///
/// 429 and 5xx are transient; every other status is final.
pub fn classify_status(status: StatusCode) -> Disposition {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Disposition::Retry
    } else {
        Disposition::Abort
    }
}

/// Classify a request that failed before a response arrived
///
/// Connection resets, timeouts and name-resolution failures are transient;
/// builder/redirect/body errors are not.
pub fn classify_transport(error: &reqwest::Error) -> Disposition {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        Disposition::Retry
    } else {
        Disposition::Abort
    }
}

/// Wrap `error` into the attempt variant matching `disposition`
pub fn attempt_from<T, E>(disposition: Disposition, error: E) -> Attempt<T, E> {
    match disposition {
        Disposition::Retry => Attempt::Retry(error),
        Disposition::Abort => Attempt::Abort(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            factor: 2.0,
            max_delay: Duration::from_millis(4),
            jitter: true,
        }
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(2000),
            factor: 2.0,
            max_delay: Duration::from_millis(15_000),
            jitter: false,
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
        assert_eq!(policy.backoff(3), Duration::from_millis(8000));
        assert_eq!(policy.backoff(4), Duration::from_millis(15_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
    }

    #[test]
    fn jitter_stays_within_window() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(1000),
            factor: 2.0,
            max_delay: Duration::from_millis(10_000),
            jitter: true,
        };

        for _ in 0..100 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay < Duration::from_millis(4000));
        }
        for _ in 0..100 {
            assert!(policy.delay_for(4) <= Duration::from_millis(10_000));
        }
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), Disposition::Retry);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), Disposition::Retry);
        assert_eq!(classify_status(StatusCode::INTERNAL_SERVER_ERROR), Disposition::Retry);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), Disposition::Abort);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), Disposition::Abort);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<&str, String> = execute(&fast_policy(4), "test", |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Attempt::Retry(format!("boom {attempt}"))
                } else {
                    Attempt::Success("ok")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn abort_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = execute(&fast_policy(4), "test", |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Attempt::Abort("not found".to_string())
            }
        })
        .await;

        assert_eq!(result, Err("not found".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = execute(&fast_policy(3), "test", |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Attempt::Retry(format!("attempt {attempt} failed"))
            }
        })
        .await;

        assert_eq!(result, Err("attempt 3 failed".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn policy_from_config_never_allows_zero_attempts() {
        let config = RetryConfig {
            max_attempts: 0,
            base_delay_ms: 10,
            factor: 2.0,
            max_delay_ms: 100,
            jitter: false,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
    }
}
