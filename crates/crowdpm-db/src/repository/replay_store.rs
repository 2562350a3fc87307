//! Redis-backed [`ReplayStore`] for DPoP proof `jti` values.
//!
//! Per-instance in a multi-instance deployment unless Redis is shared, which
//! spec.md §5 calls out as acceptable: the `jti` binding already forces
//! attacker effort per instance.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use crowdpm_common::error::{CrowdpmError, CrowdpmResult};
use crowdpm_common::ports::ReplayStore;

use crate::redis_pool;

pub struct RedisReplayStore {
    conn: ConnectionManager,
}

impl RedisReplayStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ReplayStore for RedisReplayStore {
    async fn check_and_insert(&self, key: &str, ttl: Duration) -> CrowdpmResult<bool> {
        let mut conn = self.conn.clone();
        redis_pool::set_nx_ex(&mut conn, &format!("replay:{key}"), ttl.as_secs())
            .await
            .map_err(CrowdpmError::Redis)
    }
}
