//! Retry engine: exponential backoff with jitter.
//!
//! Classification is two predicates — [`ClientError::is_retryable`] on the
//! error and cancellation on the token. Non-retryable or cancelled errors
//! short-circuit. The backoff sleep is interruptible: cancellation during
//! the sleep surfaces as [`ClientError::Cancelled`], never as the
//! underlying retryable error.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use confab_core::ClientError;

/// Backoff schedule parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the first retry; doubles each attempt.
    pub initial: Duration,
    /// How many retryable failures to absorb before surfacing the error.
    pub max_retries: u32,
    /// Uniform jitter fraction applied per attempt (0.1 = ±10 %).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max_retries: 5,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// The jittered delay for retry attempt `attempt` (0-based).
    ///
    /// `initial · 2^attempt`, scaled by a fresh uniform sample in
    /// `[1 − jitter, 1 + jitter]`, clamped non-negative. The sample is
    /// drawn per call; it is never reused across attempts.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial.as_secs_f64() * 2_f64.powi(attempt.min(31) as i32);
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((base * factor).max(0.0))
    }

    /// Sleep for the attempt's delay, aborting early on cancellation.
    ///
    /// Returns the delay that was slept, for event reporting.
    pub async fn sleep(
        &self,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<Duration, ClientError> {
        let delay = self.delay_for(attempt);
        tokio::select! {
            () = cancel.cancelled() => Err(ClientError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(delay),
        }
    }

    /// Run `op` until it succeeds, a non-retryable error surfaces, the
    /// retry budget is exhausted, or `cancel` fires.
    ///
    /// `on_backoff(attempt, delay)` is invoked before each backoff sleep
    /// with the 1-based attempt number — the session uses it to emit
    /// `Reconnecting` events.
    pub async fn retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut on_backoff: impl FnMut(u32, Duration),
        mut op: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable failure — backing off"
                    );
                    on_backoff(attempt + 1, delay);
                    tokio::select! {
                        () = cancel.cancelled() => return Err(ClientError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                // Exhausted or non-retryable: surface the error unchanged.
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_stays_inside_jitter_envelope() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let expected = Duration::from_secs(1 << attempt);
            for _ in 0..50 {
                let delay = policy.delay_for(attempt);
                assert!(delay >= expected.mul_f64(0.9), "attempt {attempt}: {delay:?}");
                assert!(delay <= expected.mul_f64(1.1), "attempt {attempt}: {delay:?}");
            }
        }
    }

    #[tokio::test]
    async fn non_retryable_short_circuits() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .retry(&cancel, |_, _| {}, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::Auth("bad key".into())) }
            })
            .await;
        assert!(matches!(result, Err(ClientError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_budget_is_exhausted() {
        let policy = RetryPolicy {
            initial: Duration::from_millis(10),
            max_retries: 3,
            jitter: 0.1,
        };
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .retry(&cancel, |_, _| {}, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::server_retryable("unavailable")) }
            })
            .await;
        // Initial attempt plus max_retries retries; last error unchanged.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(result, Err(ClientError::Server { retryable: true, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            initial: Duration::from_millis(10),
            max_retries: 5,
            jitter: 0.1,
        };
        let cancel = CancellationToken::new();
        let backoffs = AtomicU32::new(0);
        let result = policy
            .retry(
                &cancel,
                |_, _| {
                    backoffs.fetch_add(1, Ordering::SeqCst);
                },
                |attempt| async move {
                    if attempt < 2 {
                        Err(ClientError::server_retryable("unavailable"))
                    } else {
                        Ok(attempt)
                    }
                },
            )
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(backoffs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_during_sleep_wins_over_retryable_error() {
        let policy = RetryPolicy {
            initial: Duration::from_secs(60),
            max_retries: 5,
            jitter: 0.1,
        };
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });
        let result: Result<(), _> = policy
            .retry(&cancel, |_, _| {}, |_| async {
                Err(ClientError::server_retryable("unavailable"))
            })
            .await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }
}
