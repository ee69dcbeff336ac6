//! Reusable retry policy for external calls.
//!
//! The policy is a plain value (initial delay, multiplier, cap, total budget)
//! applied at call sites with [`with_retry`]. Callers classify their failures
//! as transient (worth retrying) or permanent (fail immediately).

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_ms: u64,
    pub multiplier: f64,
    pub cap_ms: u64,
    /// Total elapsed budget across all attempts, including sleeps.
    pub budget_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 2000,
            multiplier: 2.0,
            cap_ms: 60_000,
            budget_ms: 1_800_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given retry attempt (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.initial_ms as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis((raw as u64).min(self.cap_ms))
    }

    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

/// A failure classified by the call site.
#[derive(Debug)]
pub enum RetryError {
    Transient(anyhow::Error),
    Permanent(anyhow::Error),
}

impl RetryError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }

    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(err.into())
    }

    pub fn into_inner(self) -> anyhow::Error {
        match self {
            Self::Transient(e) | Self::Permanent(e) => e,
        }
    }
}

/// Run `op` under the policy: transient failures back off exponentially until
/// the budget is exhausted, permanent failures return immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError>>,
{
    let started = tokio::time::Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(RetryError::Permanent(err)) => {
                return Err(err.context(format!("{op_name} failed permanently")));
            }
            Err(RetryError::Transient(err)) => {
                let delay = policy.delay_for(attempt);
                let elapsed = started.elapsed();
                if elapsed + delay >= policy.budget() {
                    return Err(err.context(format!(
                        "{op_name} exhausted retry budget after {} attempts",
                        attempt + 1
                    )));
                }
                tracing::warn!(
                    "{op_name} attempt {} failed ({err:#}), retrying in {:?}",
                    attempt + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        // 2s * 2^10 = 2048s, capped at 60s
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = with_retry(&policy, "test_op", move || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RetryError::transient(anyhow::anyhow!("flaky")))
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
    async fn test_permanent_failure_returns_immediately() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: anyhow::Result<()> = with_retry(&policy, "test_op", move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RetryError::permanent(anyhow::anyhow!("bad auth")))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_gives_up() {
        let policy = RetryPolicy {
            initial_ms: 100,
            multiplier: 2.0,
            cap_ms: 400,
            budget_ms: 1000,
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let started = tokio::time::Instant::now();
        let result: anyhow::Result<()> = with_retry(&policy, "test_op", move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RetryError::transient(anyhow::anyhow!("always down")))
            }
        })
        .await;

        assert!(result.is_err());
        // Never sleeps past the budget.
        assert!(started.elapsed() <= Duration::from_millis(1000));
        let n = calls.load(Ordering::SeqCst);
        assert!(n >= 2, "expected multiple attempts, got {n}");
    }

    #[test]
    fn test_retry_error_into_inner() {
        let err = RetryError::transient(anyhow::anyhow!("x"));
        assert_eq!(err.into_inner().to_string(), "x");
    }
}
