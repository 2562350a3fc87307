//! Postgres-backed [`BatchRecordStore`] — the pending-batch ledger the
//! ingest gateway (C6) writes to at admission time and the out-of-scope
//! processing worker later marks `processed_at` against.

use async_trait::async_trait;
use sqlx::PgPool;

use crowdpm_common::error::CrowdpmResult;
use crowdpm_common::models::ingest::IngestBatchRecord;
use crowdpm_common::ports::BatchRecordStore;

pub struct PgBatchRecordStore {
    pool: PgPool,
}

impl PgBatchRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchRecordStore for PgBatchRecordStore {
    async fn create(&self, record: IngestBatchRecord) -> CrowdpmResult<IngestBatchRecord> {
        let row = sqlx::query_as::<_, IngestBatchRecord>(
            r#"
            INSERT INTO batches (batch_id, device_id, storage_path, count, processed_at, visibility, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(record.batch_id)
        .bind(&record.device_id)
        .bind(&record.storage_path)
        .bind(record.count)
        .bind(record.processed_at)
        .bind(record.visibility)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}
