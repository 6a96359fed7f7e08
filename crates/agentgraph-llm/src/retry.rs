//! Bounded linear backoff for rate-limited provider calls.
//!
//! Only `LlmError::RateLimited` is retried. Everything else propagates on the
//! first failure. Exhausting the attempts yields `LlmError::RetriesExhausted`.

use crate::provider::{LlmError, LlmResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(750);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Delay after the given (1-based) failed attempt: `base × attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.max(1))
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-rate-limit error, or the
/// policy runs out of attempts. `on_retry(attempt, delay)` fires before each sleep.
pub async fn with_retry<T, F, Fut, R>(policy: &RetryPolicy, mut op: F, mut on_retry: R) -> LlmResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = LlmResult<T>>,
    R: FnMut(u32, Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_rate_limit() => {
                if attempt >= max_attempts {
                    warn!(attempts = attempt, "provider rate limit persisted, giving up");
                    return Err(LlmError::RetriesExhausted { attempts: attempt });
                }
                let delay = policy.delay_for(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "provider rate limited, backing off");
                on_retry(attempt, delay);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn reference_schedule_is_linear_and_capped() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_millis(750));
        assert_eq!(p.delay_for(2), Duration::from_millis(1500));
        assert_eq!(p.delay_for(100), DEFAULT_MAX_DELAY);
    }

    #[tokio::test]
    async fn non_rate_limit_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
        let result: LlmResult<()> = with_retry(
            &policy,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LlmError::AuthFailed("bad key".into())) }
            },
            |_, _| {},
        )
        .await;
        assert!(matches!(result, Err(LlmError::AuthFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_rate_limit() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let result = with_retry(
            &policy,
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(LlmError::RateLimited { retry_after_ms: 0 })
                    } else {
                        Ok(attempt)
                    }
                }
            },
            |_, _| {},
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
