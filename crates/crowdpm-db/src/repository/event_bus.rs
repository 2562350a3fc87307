//! Redis pub/sub-backed [`EventBus`] — publish-only. The topic is resolved
//! once at process init (spec.md §9); this module never auto-creates
//! anything, it only publishes to whatever channel name it's given.

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crowdpm_common::error::{CrowdpmError, CrowdpmResult};
use crowdpm_common::models::ingest::IngestEvent;
use crowdpm_common::ports::EventBus;

use crate::deadline::{with_deadline, INGEST_CALL_TIMEOUT};
use crate::redis_pool;
use crate::retry::with_backoff;

pub struct RedisEventBus {
    conn: ConnectionManager,
}

impl RedisEventBus {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, topic: &str, event: &IngestEvent) -> CrowdpmResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| CrowdpmError::Internal(anyhow::anyhow!(e)))?;
        with_deadline(INGEST_CALL_TIMEOUT, "event_bus.publish", async {
            with_backoff("event_bus.publish", || {
                let mut conn = self.conn.clone();
                let payload = payload.clone();
                async move { redis_pool::publish(&mut conn, topic, &payload).await }
            })
            .await
            .map_err(CrowdpmError::Redis)
        })
        .await
    }
}
