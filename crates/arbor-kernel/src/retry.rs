//! Retry policies and async retry helper.

use std::future::Future;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Delay strategy between retry attempts.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Same delay every attempt.
    Fixed { delay_ms: u64 },
    /// Exponential backoff capped at `max_ms`: `min(base_ms * 2^attempt, max_ms)`.
    ExponentialBackoff { base_ms: u64, max_ms: u64 },
}

impl RetryPolicy {
    /// The engine's standard backoff: 1 s doubling up to a 10 s ceiling.
    pub fn standard() -> Self {
        RetryPolicy::ExponentialBackoff {
            base_ms: 1_000,
            max_ms: 10_000,
        }
    }

    /// Returns the sleep duration before the given retry attempt (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self {
            RetryPolicy::Fixed { delay_ms } => *delay_ms,
            RetryPolicy::ExponentialBackoff { base_ms, max_ms } => 1u64
                .checked_shl(attempt)
                .and_then(|s| base_ms.checked_mul(s))
                .unwrap_or(*max_ms)
                .min(*max_ms),
        };
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::standard()
    }
}

/// Retry `f` until it succeeds, a non-retryable error occurs, or
/// `max_attempts` is exhausted. Attempt `n > 0` is preceded by
/// `policy.delay_for(n - 1)` of sleep.
pub async fn retry_with_policy<F, Fut, T>(
    max_attempts: u32,
    policy: &RetryPolicy,
    mut f: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.delay_for(attempt - 1)).await;
        }
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| EngineError::Other("no attempts made".into())))
}
