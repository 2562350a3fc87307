//! Postgres-backed [`VisibilityPolicy`] — resolves the Open Question from
//! spec.md §9 ("the source does not define which accounts may set
//! `public`") as an `account_ingest_policy` table keyed by `acc_id`, with a
//! missing row defaulting to private / no override (DESIGN.md decision 2).

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crowdpm_common::error::CrowdpmResult;
use crowdpm_common::models::ingest::Visibility;
use crowdpm_common::ports::VisibilityPolicy;

pub struct PgVisibilityPolicy {
    pool: PgPool,
}

impl PgVisibilityPolicy {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VisibilityPolicy for PgVisibilityPolicy {
    async fn default_visibility(&self, acc_id: &str) -> CrowdpmResult<Visibility> {
        let row = sqlx::query("SELECT default_visibility FROM account_ingest_policy WHERE acc_id = $1")
            .bind(acc_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => row.try_get::<Visibility, _>("default_visibility")?,
            None => Visibility::Private,
        })
    }

    async fn allows_public(&self, acc_id: &str) -> CrowdpmResult<bool> {
        let row = sqlx::query("SELECT allow_public FROM account_ingest_policy WHERE acc_id = $1")
            .bind(acc_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => row.try_get::<bool, _>("allow_public")?,
            None => false,
        })
    }
}
