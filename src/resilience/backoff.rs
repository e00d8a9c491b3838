//! Exponential backoff retries.
//!
//! # Responsibilities
//! - Run a fallible async operation until it succeeds or the retry budget is spent
//! - Sleep cooperatively between attempts, growing the delay by a fixed multiplier
//! - Surface the last failure once the budget is exhausted
//!
//! # Design Decisions
//! - No jitter: each dependency picks its own budget and interval
//! - Explicit loop, so large budgets never grow the stack
//! - `retries` counts retries after the first attempt (`retries = 5` means up to 6 calls)

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry budget and delay progression.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub retries: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Factor applied to the delay after every retry.
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(retries: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            retries,
            initial_delay_ms: initial_delay.as_millis() as u64,
            multiplier,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Total number of calls the policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            initial_delay_ms: 100,
            multiplier: 1.5,
        }
    }
}

/// Context handed to the hook that runs before every retry.
#[derive(Debug)]
pub struct RetryAttempt<'a, E> {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    /// Retries left after this one.
    pub remaining: u32,
    /// How long the retrier is about to sleep.
    pub delay: Duration,
    /// The failure that triggered the retry.
    pub error: &'a E,
}

/// Retry `operation` according to `policy`.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_hook(policy, operation, |_| {}).await
}

/// Retry `operation` according to `policy`, calling `before_retry` ahead of every sleep.
pub async fn retry_with_hook<T, E, F, Fut, H>(
    policy: RetryPolicy,
    mut operation: F,
    mut before_retry: H,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    H: FnMut(&RetryAttempt<'_, E>),
{
    let mut remaining = policy.retries;
    let mut delay = policy.initial_delay();
    let mut attempt = 1u32;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if remaining == 0 {
            return Err(error);
        }
        remaining -= 1;

        before_retry(&RetryAttempt {
            attempt,
            remaining,
            delay,
            error: &error,
        });

        tokio::time::sleep(delay).await;
        delay = delay.mul_f64(policy.multiplier.max(0.0));
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_after_two_delays() {
        let calls = Cell::new(0u32);
        let start = Instant::now();

        let result: Result<u32, String> = retry(
            RetryPolicy::new(4, Duration::from_millis(100), 1.5),
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move { if n < 3 { Err(format!("attempt {} failed", n)) } else { Ok(n) } }
            },
        )
        .await;

        let elapsed = start.elapsed();
        assert_eq!(result.unwrap(), 3);
        assert!(elapsed >= Duration::from_millis(250), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(475), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = Cell::new(0u32);

        let result: Result<(), String> = retry(RetryPolicy::new(2, Duration::from_millis(10), 2.0), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { Err(format!("failure {}", n)) }
        })
        .await;

        assert_eq!(calls.get(), 3);
        assert_eq!(result.unwrap_err(), "failure 3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_sees_growing_delays() {
        let mut delays = Vec::new();

        let _: Result<(), &str> = retry_with_hook(
            RetryPolicy::new(3, Duration::from_millis(100), 2.0),
            || async { Err("down") },
            |attempt| delays.push((attempt.attempt, attempt.delay)),
        )
        .await;

        assert_eq!(
            delays,
            vec![
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(200)),
                (3, Duration::from_millis(400)),
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_retries_calls_once() {
        let calls = Cell::new(0u32);
        let result: Result<(), ()> = retry(RetryPolicy::new(0, Duration::from_secs(60), 1.0), || {
            calls.set(calls.get() + 1);
            async { Err(()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
