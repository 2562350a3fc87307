//! Trait-based ports separating the core's business logic from its
//! infrastructure. Concrete implementations live in `crowdpm-db`.
//!
//! This is the explicit redesign called for by the source's module-level
//! singleton pattern: every external dependency is an interface passed into
//! a component's constructor, collected once at startup into a
//! `Dependencies` bundle (see `crowdpm-server`'s `main`), rather than
//! threaded through ambient statics.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::CrowdpmResult;
use crate::models::ingest::Visibility;
use crate::models::{DeviceRecord, IngestBatchRecord, PairingSession};

/// Durable key-value mapping `device_code -> PairingSession` with a
/// secondary index on `user_code`. Provides no business logic — all
/// state-machine rules live in the pairing coordinator.
#[async_trait]
pub trait PairingSessionStore: Send + Sync {
    /// Transactional insert. Returns `Ok(None)` if the candidate
    /// `user_code` or `device_code` already names a non-terminal session
    /// (caller should retry with a fresh `user_code`).
    async fn create(&self, session: PairingSession) -> CrowdpmResult<Option<PairingSession>>;

    async fn get_by_device_code(&self, device_code: &str) -> CrowdpmResult<Option<PairingSession>>;

    async fn get_by_user_code(&self, user_code: &str) -> CrowdpmResult<Option<PairingSession>>;

    /// Read-modify-write under a single-row transaction. `mutator` is a
    /// pure function of the current state; it returns `Ok(Some(new_state))`
    /// to commit the mutation or `Ok(None)` to reject it (the stored state
    /// is returned unchanged either way).
    async fn update(
        &self,
        device_code: &str,
        mutator: Box<dyn FnOnce(&PairingSession) -> Option<PairingSession> + Send>,
    ) -> CrowdpmResult<Option<PairingSession>>;

    /// Garbage-collect sessions past `expires_at + grace`. Best-effort.
    async fn delete_expired(&self, grace: Duration) -> CrowdpmResult<u64>;
}

/// Owns the mapping `device_id -> (account, long-term key thumbprint,
/// lifecycle status)`.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn register(
        &self,
        req: crate::models::device::RegisterDeviceRequest,
    ) -> CrowdpmResult<DeviceRecord>;

    async fn get(&self, device_id: &str) -> CrowdpmResult<Option<DeviceRecord>>;

    async fn revoke(&self, device_id: &str, actor_id: &str, reason: &str) -> CrowdpmResult<()>;

    async fn suspend(&self, device_id: &str) -> CrowdpmResult<()>;

    async fn resume(&self, device_id: &str) -> CrowdpmResult<()>;

    /// Best-effort; failures are logged and swallowed by the caller.
    async fn touch_last_seen(&self, device_id: &str) -> CrowdpmResult<()>;
}

/// Replay-protection set for DPoP proof `jti` values, scoped to
/// `(thumbprint, method, htu, jti)`.
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Atomically checks whether `key` is already present and, if not,
    /// inserts it with the given TTL. Returns `true` if this call performed
    /// the insert (first use), `false` if the key was already present
    /// (replay).
    async fn check_and_insert(&self, key: &str, ttl: Duration) -> CrowdpmResult<bool>;
}

/// Token-bucket / fixed-window rate limiter.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consume one unit from the bucket named `key` with the given
    /// `capacity` and `window`. Returns `Ok(true)` if the request is
    /// admitted, `Ok(false)` if the budget is exhausted.
    async fn consume(&self, key: &str, capacity: u64, window: Duration) -> CrowdpmResult<bool>;
}

/// Write-once object storage for raw ingest batch blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_object(&self, path: &str, content_type: &str, bytes: &[u8]) -> CrowdpmResult<()>;
}

/// Asynchronous processing event publisher.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, event: &crate::models::ingest::IngestEvent) -> CrowdpmResult<()>;
}

/// Persists the pending-batch record the ingest gateway owns until the
/// downstream processing worker runs.
#[async_trait]
pub trait BatchRecordStore: Send + Sync {
    async fn create(&self, record: IngestBatchRecord) -> CrowdpmResult<IngestBatchRecord>;
}

/// Resolves the account-scoped ingest visibility policy referenced by
/// spec.md §4.6 step 7. An account with no policy row defaults to private.
#[async_trait]
pub trait VisibilityPolicy: Send + Sync {
    /// The account's default visibility for batches that don't declare one.
    async fn default_visibility(&self, acc_id: &str) -> CrowdpmResult<Visibility>;

    /// Whether this account is permitted to declare `public` on a batch.
    async fn allows_public(&self, acc_id: &str) -> CrowdpmResult<bool>;
}
