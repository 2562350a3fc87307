//! Postgres-backed [`DeviceRegistry`] (C5).
//!
//! `pub_kl_thumbprint` carries a partial unique index scoped to
//! `registry_status = 'active'` (migration `0001_init.sql`) so a revoked
//! device's key thumbprint can be reclaimed by a fresh registration without
//! manual cleanup, while two simultaneously-active devices can never share
//! a long-term key.

use async_trait::async_trait;
use sqlx::PgPool;

use crowdpm_common::error::{CrowdpmError, CrowdpmResult};
use crowdpm_common::ids::generate_id;
use crowdpm_common::models::device::{DeviceRecord, RegisterDeviceRequest};
use crowdpm_common::ports::DeviceRegistry;

pub struct PgDeviceRegistry {
    pool: PgPool,
}

impl PgDeviceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err.as_database_error().and_then(|e| e.code()), Some(code) if code == "23505")
}

#[async_trait]
impl DeviceRegistry for PgDeviceRegistry {
    async fn register(&self, req: RegisterDeviceRequest) -> CrowdpmResult<DeviceRecord> {
        let device_id = format!("dev_{}", generate_id().simple());

        let result = sqlx::query_as::<_, DeviceRecord>(
            r#"
            INSERT INTO devices
                (device_id, acc_id, pub_kl_thumbprint, pub_kl_jwk, model, version,
                 fingerprint, created_at, last_seen_at, registry_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NULL, 'active')
            RETURNING *
            "#,
        )
        .bind(&device_id)
        .bind(&req.acc_id)
        .bind(&req.pub_kl_thumbprint)
        .bind(&req.pub_kl_jwk)
        .bind(&req.model)
        .bind(&req.version)
        .bind(&req.fingerprint)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record),
            Err(e) if is_unique_violation(&e) => {
                Err(CrowdpmError::AlreadyExists { resource: "device key".to_string() })
            }
            Err(e) => Err(CrowdpmError::Database(e)),
        }
    }

    async fn get(&self, device_id: &str) -> CrowdpmResult<Option<DeviceRecord>> {
        let row = sqlx::query_as::<_, DeviceRecord>("SELECT * FROM devices WHERE device_id = $1")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn revoke(&self, device_id: &str, actor_id: &str, reason: &str) -> CrowdpmResult<()> {
        sqlx::query("UPDATE devices SET registry_status = 'revoked' WHERE device_id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        tracing::info!(device_id, actor_id, reason, "device revoked");
        Ok(())
    }

    async fn suspend(&self, device_id: &str) -> CrowdpmResult<()> {
        sqlx::query(
            "UPDATE devices SET registry_status = 'suspended' \
             WHERE device_id = $1 AND registry_status != 'revoked'",
        )
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resume(&self, device_id: &str) -> CrowdpmResult<()> {
        sqlx::query(
            "UPDATE devices SET registry_status = 'active' \
             WHERE device_id = $1 AND registry_status = 'suspended'",
        )
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_last_seen(&self, device_id: &str) -> CrowdpmResult<()> {
        sqlx::query("UPDATE devices SET last_seen_at = NOW() WHERE device_id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
