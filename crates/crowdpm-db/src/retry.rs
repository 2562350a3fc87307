//! Retry helper for the blob store and event bus's transient-failure policy.
//!
//! spec.md §7: "Blob and event-bus transient failures retry internally up to
//! 3 times with exponential backoff (50ms, 200ms, 800ms)." Store contention
//! (optimistic transaction aborts) has its own, separate jittered-backoff
//! policy and does not go through this helper.

use std::future::Future;
use std::time::Duration;

/// Backoff delays between attempts, per spec.md §7. Three retries means four
/// total attempts; the delays are consumed between attempts 1-2, 2-3, 3-4.
const BACKOFF: [Duration; 3] = [Duration::from_millis(50), Duration::from_millis(200), Duration::from_millis(800)];

/// Run `op` until it succeeds or the backoff schedule is exhausted, logging
/// each retry. The last attempt's error is returned on exhaustion.
pub async fn with_backoff<T, E, F, Fut>(op_name: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= BACKOFF.len() {
                    return Err(err);
                }
                let delay = BACKOFF[attempt];
                tracing::warn!(op = op_name, attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
