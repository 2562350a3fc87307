//! Token-signing key lifecycle.
//!
//! The service signs every registration/access token with a single Ed25519
//! key, held process-wide for the lifetime of the process. `SigningKeyManager::load`
//! first looks for a configured seed (`TOKEN_SIGNING_PRIVATE_KEY`); if absent
//! it falls back to loading the most recent non-expired key from the
//! `token_signing_keys` table, generating and persisting a new one on first
//! run — the same "query active row, else generate-and-persist" shape used
//! elsewhere in this codebase for long-lived service keys.

use std::sync::Arc;

use anyhow::anyhow;
use base64::Engine as _;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row as _};
use tracing::{info, warn};

use crate::{error::SecurityError, keys::SigningKeyPair};

const KEY_TTL_DAYS: i64 = 90;

/// Loads or provisions the service's Ed25519 token-signing key.
pub struct SigningKeyManager {
    pool: PgPool,
}

impl SigningKeyManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Return the active signing key, preferring the configured seed over
    /// the DB-backed fallback.
    pub async fn load(&self, configured_seed_b64: &str) -> Result<Arc<SigningKeyPair>, SecurityError> {
        if !configured_seed_b64.is_empty() {
            let seed = base64::engine::general_purpose::STANDARD
                .decode(configured_seed_b64)
                .map_err(|_| SecurityError::KeyLoad("TOKEN_SIGNING_PRIVATE_KEY is not valid base64".into()))?;
            let kp = SigningKeyPair::from_seed(&seed)?;
            info!("token signing key loaded from configuration: {}", kp.key_id);
            return Ok(Arc::new(kp));
        }
        self.load_or_generate_from_db().await
    }

    async fn load_or_generate_from_db(&self) -> Result<Arc<SigningKeyPair>, SecurityError> {
        let row = sqlx::query(
            "SELECT key_id, seed_bytes \
             FROM token_signing_keys \
             WHERE is_active = TRUE AND expires_at > NOW() \
             ORDER BY created_at DESC \
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SecurityError::Other(anyhow!(e)))?;

        if let Some(row) = row {
            let key_id: String = row.try_get("key_id").map_err(|e| SecurityError::Other(anyhow!(e)))?;
            let seed_bytes: Vec<u8> = row
                .try_get("seed_bytes")
                .map_err(|e| SecurityError::Other(anyhow!(e)))?;

            let kp = SigningKeyPair::from_seed(&seed_bytes)?;
            info!("token signing key loaded from database: {}", key_id);
            return Ok(Arc::new(kp));
        }

        warn!("no active token signing key — generating a new Ed25519 key pair");

        let kp = SigningKeyPair::generate();
        let expires_at = Utc::now() + Duration::days(KEY_TTL_DAYS);

        sqlx::query(
            "INSERT INTO token_signing_keys \
             (key_id, seed_bytes, public_key_b64, expires_at, is_active) \
             VALUES ($1, $2, $3, $4, TRUE) \
             ON CONFLICT (key_id) DO NOTHING",
        )
        .bind(&kp.key_id)
        .bind(kp.seed_bytes().to_vec())
        .bind(kp.public_key_base64())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SecurityError::Other(anyhow!(e)))?;

        info!("generated and persisted new token signing key {}", kp.key_id);
        Ok(Arc::new(kp))
    }
}
