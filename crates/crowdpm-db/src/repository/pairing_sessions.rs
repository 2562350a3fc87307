//! Postgres-backed [`PairingSessionStore`] (C1).
//!
//! `device_code` is the primary key; `user_code` carries a partial unique
//! index scoped to non-terminal sessions (`status IN ('pending',
//! 'authorized')`) so a `user_code` can be reused once a prior session
//! using it has expired or redeemed — see migration `0001_init.sql`.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use crowdpm_common::error::{CrowdpmError, CrowdpmResult};
use crowdpm_common::models::pairing::{PairingSession, PairingSessionStatus};
use crowdpm_common::ports::PairingSessionStore;

use crate::deadline::{with_deadline, STORE_CALL_TIMEOUT};

pub struct PgPairingSessionStore {
    pool: PgPool,
}

impl PgPairingSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err.as_database_error().and_then(|e| e.code()), Some(code) if code == "23505")
}

#[async_trait]
impl PairingSessionStore for PgPairingSessionStore {
    async fn create(&self, session: PairingSession) -> CrowdpmResult<Option<PairingSession>> {
        with_deadline(STORE_CALL_TIMEOUT, "pairing_sessions.create", async {
            let result = sqlx::query(
                r#"
                INSERT INTO pairing_sessions
                    (device_code, user_code, pub_ke_thumbprint, pub_ke_jwk, fingerprint,
                     model, version, nonce, requester_ip_coarsened, requester_asn_hint,
                     status, acc_id, poll_interval_secs, last_poll_at, expires_at,
                     created_at, registration_token_jti, registration_token_expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                "#,
            )
            .bind(&session.device_code)
            .bind(&session.user_code)
            .bind(&session.pub_ke_thumbprint)
            .bind(&session.pub_ke_jwk)
            .bind(&session.fingerprint)
            .bind(&session.model)
            .bind(&session.version)
            .bind(&session.nonce)
            .bind(&session.requester_ip_coarsened)
            .bind(&session.requester_asn_hint)
            .bind(session.status)
            .bind(&session.acc_id)
            .bind(session.poll_interval_secs)
            .bind(session.last_poll_at)
            .bind(session.expires_at)
            .bind(session.created_at)
            .bind(session.registration_token_jti)
            .bind(session.registration_token_expires_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(Some(session)),
                Err(e) if is_unique_violation(&e) => Ok(None),
                Err(e) => Err(CrowdpmError::Database(e)),
            }
        })
        .await
    }

    async fn get_by_device_code(&self, device_code: &str) -> CrowdpmResult<Option<PairingSession>> {
        with_deadline(STORE_CALL_TIMEOUT, "pairing_sessions.get_by_device_code", async {
            let row = sqlx::query_as::<_, PairingSession>("SELECT * FROM pairing_sessions WHERE device_code = $1")
                .bind(device_code)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        })
        .await
    }

    async fn get_by_user_code(&self, user_code: &str) -> CrowdpmResult<Option<PairingSession>> {
        with_deadline(STORE_CALL_TIMEOUT, "pairing_sessions.get_by_user_code", async {
            let row = sqlx::query_as::<_, PairingSession>("SELECT * FROM pairing_sessions WHERE user_code = $1")
                .bind(user_code)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        })
        .await
    }

    async fn update(
        &self,
        device_code: &str,
        mutator: Box<dyn FnOnce(&PairingSession) -> Option<PairingSession> + Send>,
    ) -> CrowdpmResult<Option<PairingSession>> {
        with_deadline(STORE_CALL_TIMEOUT, "pairing_sessions.update", async {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query_as::<_, PairingSession>(
                "SELECT * FROM pairing_sessions WHERE device_code = $1 FOR UPDATE",
            )
            .bind(device_code)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(current) = row else {
                tx.rollback().await?;
                return Ok(None);
            };

            let Some(new_state) = mutator(&current) else {
                tx.commit().await?;
                return Ok(Some(current));
            };

            sqlx::query(
                r#"
                UPDATE pairing_sessions
                SET status = $2,
                    acc_id = $3,
                    poll_interval_secs = $4,
                    last_poll_at = $5,
                    registration_token_jti = $6,
                    registration_token_expires_at = $7
                WHERE device_code = $1
                "#,
            )
            .bind(device_code)
            .bind(new_state.status)
            .bind(&new_state.acc_id)
            .bind(new_state.poll_interval_secs)
            .bind(new_state.last_poll_at)
            .bind(new_state.registration_token_jti)
            .bind(new_state.registration_token_expires_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(Some(new_state))
        })
        .await
    }

    async fn delete_expired(&self, grace: Duration) -> CrowdpmResult<u64> {
        with_deadline(STORE_CALL_TIMEOUT, "pairing_sessions.delete_expired", async {
            let grace_interval = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::zero());
            let result = sqlx::query("DELETE FROM pairing_sessions WHERE expires_at + $1 < NOW()")
                .bind(grace_interval)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}

/// `true` iff `status` is a terminal state (`Redeemed`/`Expired`), matching
/// the DAG in spec.md §4.2 — exposed for callers that need to branch on
/// terminality without re-deriving it.
pub fn is_terminal(status: PairingSessionStatus) -> bool {
    matches!(status, PairingSessionStatus::Redeemed | PairingSessionStatus::Expired)
}
