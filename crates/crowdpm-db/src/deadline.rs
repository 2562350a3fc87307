//! Per-call deadlines for external I/O, per spec.md §5: "external-service
//! timeouts are half the request budget" (10s default / 30s ingest at the
//! router). This is independent of `retry::with_backoff` — a call can retry
//! several times and still blow its deadline, in which case the whole
//! attempt sequence is cut short rather than letting a single slow retry
//! eat the rest of the request budget.

use std::future::Future;
use std::time::Duration;

use crowdpm_common::error::{CrowdpmError, CrowdpmResult};

/// Half of the default 10s request budget — the deadline for pairing-session
/// store calls, which only ever run behind 10s-budget endpoints.
pub const STORE_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Half of ingest's 30s request budget — the deadline for the blob store and
/// event bus, which only ever run behind the ingest endpoint.
pub const INGEST_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Run `fut` under `timeout`, turning an elapsed deadline into
/// `CrowdpmError::Internal` so callers don't need a separate error arm.
pub async fn with_deadline<T>(
    timeout: Duration,
    op_name: &str,
    fut: impl Future<Output = CrowdpmResult<T>>,
) -> CrowdpmResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(op = op_name, timeout_ms = timeout.as_millis() as u64, "external call missed its deadline");
            Err(CrowdpmError::Internal(anyhow::anyhow!("{op_name} timed out after {}ms", timeout.as_millis())))
        }
    }
}
