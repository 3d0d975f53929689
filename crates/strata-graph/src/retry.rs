//! Bounded retry for transient store failures.

use std::future::Future;

use strata_core::{RetryPolicy, StoreError};

/// The last error seen once a retried operation gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    pub error: StoreError,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are used up. Sleeps with exponential backoff between
/// attempts.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, Exhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max = policy.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < max => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = max,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient store failure, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(error) => {
                return Err(Exhausted {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}
