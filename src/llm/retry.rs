//! Bounded retry with exponential backoff and jitter.
//!
//! Retries only what waiting can fix: `transient_http` and `rate_limited`.
//! Auth failures, invalid requests, and content-policy refusals are raised
//! immediately — repeating those wastes budget and delays the fallback
//! chain, which is the layer that actually handles them.
//!
//! The sleep before retry `k` (1-indexed) is
//! `initial_delay · 2^(k−1)` scaled by a ±20 % jitter factor so concurrent
//! page tasks that failed together don't all come back at the same instant.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::LlmError;

/// Retry knobs, taken from [`crate::config::PipelineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, inclusive of the first try. `1` disables retries.
    pub max_attempts: u32,
    /// Backoff base; doubles per retry.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-indexed), jitter applied.
    fn backoff(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * 2f64.powi(retry.saturating_sub(1) as i32);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_secs_f64(base * jitter)
    }
}

/// Run `op` with bounded retries.
///
/// `op` is invoked fresh per attempt so each attempt re-acquires the rate
/// limiter and re-sends the request. Terminal errors return immediately;
/// retryable errors return [`LlmError::RetriesExhausted`] once attempts run
/// out, carrying the attempt count and the last underlying error.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.kind().is_retryable() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                warn!("attempt {attempt}/{max_attempts} failed, no retries left: {err}");
                return Err(LlmError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            Err(err) => {
                let delay = policy.backoff(attempt);
                debug!(
                    "attempt {attempt}/{max_attempts} failed ({err}); retrying in {:.2}s",
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
