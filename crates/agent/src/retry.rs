//! Bounded exponential backoff for a single guarded async operation.
//!
//! Only errors the caller's predicate accepts are retried; everything
//! else propagates on the first attempt with zero delay. After the
//! attempt budget is spent, the last error is returned unmodified so the
//! root cause is never wrapped away.

use std::future::Future;
use std::time::Duration;

use tw_domain::config::RetryConfig;

/// Exponential backoff parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the backoff curve.
    pub max_delay: Duration,
    /// Total attempt budget (first try included).
    pub max_attempts: u32,
}

/// Progress of one guarded call. Scoped to a single [`RetryPolicy::run`];
/// discarded after success or exhaustion.
#[derive(Debug)]
struct RetryState {
    /// 1-based attempt counter.
    attempt: u32,
    next_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            // An attempt budget of zero would never run the operation.
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Delay after the given failed attempt (1-based):
    /// `min(max_delay, base_delay * 2^(attempt-1))`, non-decreasing.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64 << exponent;
        let delay = self
            .base_delay
            .checked_mul(factor.min(u64::from(u32::MAX)) as u32)
            .unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }

    /// Run `op`, retrying failures accepted by `retryable` with the
    /// backoff curve, up to the attempt budget.
    pub async fn run<T, E, F, Fut, P>(&self, retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut state = RetryState {
            attempt: 1,
            next_delay: self.delay_for_attempt(1),
        };

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !retryable(&e) {
                        tracing::debug!(error = %e, "non-retryable failure, propagating");
                        return Err(e);
                    }
                    if state.attempt >= self.max_attempts {
                        tracing::warn!(
                            attempts = state.attempt,
                            error = %e,
                            "attempt budget exhausted, propagating last error"
                        );
                        return Err(e);
                    }
                    tracing::warn!(
                        attempt = state.attempt,
                        delay_ms = state.next_delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(state.next_delay).await;
                    state.attempt += 1;
                    state.next_delay = self.delay_for_attempt(state.attempt);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("resource exhausted")]
        ResourceExhausted,
        #[error("fatal")]
        Fatal,
    }

    fn is_exhausted(e: &TestError) -> bool {
        matches!(e, TestError::ResourceExhausted)
    }

    fn policy(base_ms: u64, max_ms: u64, attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            max_attempts: attempts,
        }
    }

    #[test]
    fn delays_double_and_cap() {
        let p = policy(2_000, 60_000, 10);
        assert_eq!(p.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(p.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(p.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(p.delay_for_attempt(6), Duration::from_secs(60)); // capped at 64
        assert_eq!(p.delay_for_attempt(40), Duration::from_secs(60));
    }

    #[test]
    fn delays_are_non_decreasing() {
        let p = policy(1_000, 30_000, 10);
        let mut last = Duration::ZERO;
        for attempt in 1..=20 {
            let d = p.delay_for_attempt(attempt);
            assert!(d >= last);
            last = d;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_transient_failures_then_success() {
        let p = policy(2_000, 60_000, 3);
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let calls_in = calls.clone();
        let result: Result<u32, TestError> = p
            .run(is_exhausted, move || {
                let calls = calls_in.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError::ResourceExhausted)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3); // 1 try + exactly 2 retries
        // Delays were 2s then 4s.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_propagates_immediately() {
        let p = policy(2_000, 60_000, 5);
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let calls_in = calls.clone();
        let result: Result<(), TestError> = p
            .run(is_exhausted, move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                }
            })
            .await;

        assert!(matches!(result.unwrap_err(), TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_returns_last_error_unmodified() {
        let p = policy(1_000, 60_000, 3);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = calls.clone();
        let result: Result<(), TestError> = p
            .run(is_exhausted, move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::ResourceExhausted)
                }
            })
            .await;

        assert!(matches!(result.unwrap_err(), TestError::ResourceExhausted));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn immediate_success_never_sleeps() {
        let p = policy(60_000, 60_000, 3);
        let result: Result<&str, TestError> = p.run(is_exhausted, || async { Ok("done") }).await;
        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn zero_attempt_config_clamped_to_one() {
        let mut cfg = tw_domain::config::RetryConfig::default();
        cfg.max_attempts = 0;
        assert_eq!(RetryPolicy::from_config(&cfg).max_attempts, 1);
    }
}
