use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::IngestError;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_DELAY_MS: u64 = 2_000;
const MAX_DELAY_MS: u64 = 10_000;

/// Exponential backoff for source fetches.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Run `f` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are spent.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    f: F,
) -> Result<T, IngestError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;

        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempts >= max_attempts => {
                error!(
                    operation = %operation,
                    attempts = attempts,
                    error = %e,
                    "Max retries exceeded"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempts);
                warn!(
                    operation = %operation,
                    attempt = attempts,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Fetch failed, retrying..."
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
