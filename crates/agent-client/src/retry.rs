use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{AgentError, AgentResult};

/// Exponential backoff with jitter. Transient failures only; schema
/// violations and open circuits return immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` (1-based) failed attempts.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << (attempt - 1).min(16))
            .min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=exp / 2);
        Duration::from_millis(exp + jitter)
    }
}

/// Run `op` under the policy, retrying transient failures.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    worker_name: &str,
    op: F,
) -> AgentResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = AgentResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    "{worker_name} attempt {attempt}/{} failed ({err}), retrying in {:?}",
                    policy.max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        let result = with_retry(policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AgentError::RequestFailed("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn schema_violations_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: AgentResult<()> = with_retry(RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AgentError::SchemaViolation("bad shape".into())) }
        })
        .await;
        assert!(matches!(result, Err(AgentError::SchemaViolation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        let result: AgentResult<()> = with_retry(policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AgentError::Timeout(1)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
