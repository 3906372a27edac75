use chatpipe_core::Result;
use std::future::Future;
use std::time::Duration;

/// Fixed-delay retry policy: `retry_limit` extra attempts after the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_limit: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.retry_limit.saturating_add(1)
    }
}

/// Run `op` until it succeeds or `policy.max_attempts()` attempts have failed.
///
/// `op` receives the 0-based attempt number. The delay is slept between attempts only,
/// so concurrent callers back off independently.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= policy.retry_limit => {
                tracing::warn!(what, attempts = attempt + 1, error = %e, "giving up");
                return Err(e);
            }
            Err(e) => {
                tracing::debug!(what, attempt, error = %e, "attempt failed; retrying");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}
