use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::EngineError;

/// Retries a fallible async operation with exponential backoff
/// (1s, 2s, 4s — spec.md §4.1), collapsing to a typed "no data" error once
/// attempts are exhausted. Mirrors the retry idiom of the pack's
/// `common::rate_limiter` / `common::circuit_breaker` helpers, generalized
/// to an arbitrary async closure rather than a fixed HTTP call.
pub async fn retry_with_backoff<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut delay = Duration::from_secs(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(attempt, error = %err, "market data fetch attempt failed");
                last_err = Some(err);
                if attempt + 1 < attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| EngineError::transient("retries exhausted")))
}
