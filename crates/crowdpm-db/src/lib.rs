//! # crowdpm-db
//!
//! PostgreSQL, Redis, and S3 implementations of the port traits defined in
//! `crowdpm_common::ports`. This crate is pure infrastructure: no
//! pairing/ingest business logic lives here, only the durable mechanics
//! those components depend on.

pub mod deadline;
pub mod postgres;
pub mod redis_pool;
pub mod repository;
pub mod retry;
pub mod storage;

use anyhow::{Context, Result};

/// Shared database state passed through the server's `Dependencies` bundle.
#[derive(Clone)]
pub struct Database {
    pub pool: sqlx::PgPool,
    pub redis: redis::aio::ConnectionManager,
}

impl Database {
    /// Connect to Postgres and Redis using the URLs in `config`.
    pub async fn connect(config: &crowdpm_common::config::AppConfig) -> Result<Self> {
        tracing::info!("connecting to PostgreSQL");
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .connect(&config.database.url)
            .await
            .context("failed to connect to PostgreSQL")?;

        tracing::info!("connecting to Redis");
        let client = redis::Client::open(config.redis.url.as_str()).context("invalid Redis URL")?;
        let redis = redis::aio::ConnectionManager::new(client)
            .await
            .context("failed to connect to Redis")?;
        tracing::info!("connected to Redis");

        Ok(Self { pool, redis })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("migrations complete");
        Ok(())
    }
}
