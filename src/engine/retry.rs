//! Bounded retry around submission
//!
//! Only transient transport failures are retried. Delays grow exponentially
//! with full jitter, and the whole loop is capped both by attempt count and by
//! wall time. Each attempt runs under a timeout of the budget it has left and
//! the final delay is truncated the same way.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::warn;

use crate::config::RetryConfig;
use crate::metrics::metrics;
use crate::sender::SendError;

/// Retry policy for submission
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,

    /// Multiplier for exponential backoff
    pub base: f64,

    /// Delay unit
    pub factor: Duration,

    /// Wall-time budget across all attempts
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: 1.5,
            factor: Duration::from_millis(100),
            max_elapsed: Duration::from_secs(2),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: config.base,
            factor: Duration::from_millis(config.factor_ms),
            max_elapsed: Duration::from_millis(config.max_elapsed_ms),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the delay after the given failed attempt (1-based)
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let ms = self.factor.as_millis() as f64 * self.base.powi(attempt as i32);
        Duration::from_millis(ms.min(self.max_elapsed.as_millis() as f64) as u64)
    }

    /// Full jitter: uniform in `[0, ceiling]`
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// Result of a retried operation plus how many attempts it took
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, SendError>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails permanently, or the policy is exhausted
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Attempted<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SendError>>,
{
    let started = Instant::now();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let remaining = policy.max_elapsed.saturating_sub(started.elapsed());
        let err = match timeout(remaining, op(attempt)).await {
            Ok(Ok(value)) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Ok(Err(e)) => e,
            Err(_) => SendError::timeout(format!(
                "attempt {attempt} exceeded the {}ms retry budget",
                policy.max_elapsed.as_millis()
            )),
        };

        let elapsed = started.elapsed();
        if !err.is_transient() || attempt >= policy.max_attempts || elapsed >= policy.max_elapsed {
            return Attempted {
                result: Err(err),
                attempts: attempt,
            };
        }

        let delay = policy.jittered_delay(attempt).min(policy.max_elapsed - elapsed);
        metrics().submit_retries.inc();
        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Transient submission failure, retrying");
        sleep(delay).await;
        if started.elapsed() >= policy.max_elapsed {
            return Attempted {
                result: Err(err),
                attempts: attempt,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::SenderKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_ceiling_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(150));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(225));
        assert_eq!(policy.backoff_ceiling(60), Duration::from_secs(2));
        for _ in 0..100 {
            assert!(policy.jittered_delay(2) <= Duration::from_millis(225));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_stop_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let outcome: Attempted<()> = retry_transient(&RetryPolicy::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SendError::timeout("slow")) }
        })
        .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(outcome.result.unwrap_err().is_transient());
        assert!(started.elapsed() <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let outcome: Attempted<()> = retry_transient(&RetryPolicy::default(), |_| async {
            Err(SendError::Rejected {
                sender: SenderKind::HostedRelay,
                reason: "bad".into(),
            })
        })
        .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_time_budget_cuts_attempts_short() {
        let started = Instant::now();
        let outcome: Attempted<()> = retry_transient(&RetryPolicy::default(), |_| async {
            sleep(Duration::from_millis(1_500)).await;
            Err(SendError::connect("refused"))
        })
        .await;

        // 1.5s attempt, short delay, then the second attempt is cut at the budget
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.result.unwrap_err().is_transient());
        assert!(started.elapsed() <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_attempt_is_cut_at_budget() {
        let started = Instant::now();
        let outcome: Attempted<()> = retry_transient(&RetryPolicy::default(), |_| async {
            // As long as the default HTTP client timeout
            sleep(Duration::from_millis(10_000)).await;
            Err(SendError::timeout("http timeout"))
        })
        .await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(
            outcome.result,
            Err(SendError::Transport {
                kind: crate::sender::TransportKind::Timeout,
                ..
            })
        ));
        assert!(started.elapsed() <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let outcome = retry_transient(&RetryPolicy::default(), |attempt| async move {
            if attempt < 2 {
                Err(SendError::timeout("slow"))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(outcome.result.unwrap(), 2);
        assert_eq!(outcome.attempts, 2);
    }
}
