//! Redis-backed [`RateLimiter`] — a fixed-window counter per bucket key.
//!
//! Each endpoint declares its budgets as data (spec.md §9's redesign
//! guidance); this implementation only knows how to increment-and-check a
//! named window, never which budget applies to which route.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use crowdpm_common::error::{CrowdpmError, CrowdpmResult};
use crowdpm_common::ports::RateLimiter;

use crate::redis_pool;

pub struct RedisRateLimiter {
    conn: ConnectionManager,
}

impl RedisRateLimiter {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn consume(&self, key: &str, capacity: u64, window: Duration) -> CrowdpmResult<bool> {
        let mut conn = self.conn.clone();
        let count = redis_pool::incr_expire(&mut conn, &format!("ratelimit:{key}"), window.as_secs())
            .await
            .map_err(CrowdpmError::Redis)?;
        Ok(count as u64 <= capacity)
    }
}
