/*!
 * Retry Backoff
 *
 * Exponential backoff with jitter for transient external-port failures.
 * Non-transient errors surface immediately; cancellation aborts between
 * attempts, never mid side-effect.
 */

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::utils::errors::{EngineError, Result};

/// Exponential backoff policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First delay
    pub base: Duration,
    /// Multiplier applied per attempt
    pub factor: f64,
    /// Delay ceiling
    pub max_delay: Duration,
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Fractional jitter applied symmetrically (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `n` (0-based; attempt 0 has no delay)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = self.base.as_millis() as f64 * self.factor.powi(attempt as i32 - 1);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Apply symmetric jitter to a delay
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = delay.as_millis() as f64 * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        let ms = (delay.as_millis() as f64 + offset).max(0.0);
        Duration::from_millis(ms as u64)
    }
}

/// Run `op`, retrying transient errors per `policy`.
///
/// Cancellation is honored between attempts: a cancelled token makes the
/// next attempt a no-op and returns the last transient error observed.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err: Option<EngineError> = None;

    for attempt in 0..policy.max_attempts {
        if cancel.is_cancelled() {
            break;
        }
        let delay = policy.jittered(policy.delay_for_attempt(attempt));
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                tracing::warn!(attempt, error = %err, "transient failure, will retry");
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.unwrap_or_else(|| EngineError::ExternalUnavailable("external port".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_delay_cap() {
        let policy = RetryPolicy::default();
        // 500ms * 2^10 would exceed the 60s ceiling
        assert_eq!(policy.delay_for_attempt(11), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();

        let result = retry_transient(&policy, &cancel, move || {
            let calls = calls_inner.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(EngineError::ExternalTimeout("claim_switch".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_surfaces_immediately() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();

        let result: Result<()> = retry_transient(&policy, &cancel, move || {
            let calls = calls_inner.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::ExternalReject {
                    service: "claim_switch".into(),
                    code: "E0".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(EngineError::ExternalReject { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_transient() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();

        let result: Result<()> = retry_transient(&policy, &cancel, move || {
            let calls = calls_inner.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::ExternalUnavailable("pdmp".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(EngineError::ExternalUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retries() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();

        // A token cancelled before the first attempt makes the whole
        // operation a no-op.
        let result: Result<()> = retry_transient(&policy, &cancel, move || {
            let calls = calls_inner.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::ExternalTimeout("registry".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
