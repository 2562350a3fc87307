//! # crowdpm Server
//!
//! Main binary wiring together the full `Dependencies` bundle — Postgres,
//! Redis, object storage, the token-signing key, and every port-trait
//! implementation — into the pairing coordinator, ingest gateway, and HTTP
//! router, then serves the result.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crowdpm_api::{build_router, AppState};
use crowdpm_db::repository::account_policy::PgVisibilityPolicy;
use crowdpm_db::repository::batches::PgBatchRecordStore;
use crowdpm_db::repository::devices::PgDeviceRegistry;
use crowdpm_db::repository::event_bus::RedisEventBus;
use crowdpm_db::repository::pairing_sessions::PgPairingSessionStore;
use crowdpm_db::repository::rate_limiter::RedisRateLimiter;
use crowdpm_db::repository::replay_store::RedisReplayStore;
use crowdpm_db::storage::{StorageClient, StorageConfig as DbStorageConfig};
use crowdpm_db::Database;
use crowdpm_ingest::gateway::{GatewayConfig, IngestGateway};
use crowdpm_pairing::coordinator::{PairingConfig, PairingCoordinator};
use crowdpm_security::dpop::{DpopConfig, DpopVerifier};
use crowdpm_security::signing_key::SigningKeyManager;
use crowdpm_security::tokens::TokenIssuer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = crowdpm_common::config::init()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crowdpm=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("starting crowdpm-server v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::connect(config).await?;
    db.migrate().await?;

    let storage = StorageClient::new(&DbStorageConfig {
        endpoint: config.storage.endpoint.clone(),
        access_key: config.storage.access_key.clone(),
        secret_key: config.storage.secret_key.clone(),
        bucket: config.storage.bucket.clone(),
        region: config.storage.region.clone(),
    })?;
    storage.ensure_bucket().await?;
    tracing::info!(bucket = %config.storage.bucket, "object storage ready");

    let signing_key = SigningKeyManager::new(db.pool.clone())
        .load(&config.token.signing_private_key)
        .await?;
    tracing::info!(key_id = %signing_key.key_id, "token signing key ready");

    let token_issuer = Arc::new(TokenIssuer::new(
        signing_key,
        Duration::from_secs(config.token.registration_ttl_secs),
        Duration::from_secs(config.token.access_ttl_secs),
    ));

    let replay_store: Arc<dyn crowdpm_common::ports::ReplayStore> =
        Arc::new(RedisReplayStore::new(db.redis.clone()));
    let rate_limiter: Arc<dyn crowdpm_common::ports::RateLimiter> =
        Arc::new(RedisRateLimiter::new(db.redis.clone()));
    let event_bus: Arc<dyn crowdpm_common::ports::EventBus> = Arc::new(RedisEventBus::new(db.redis.clone()));
    let pairing_store: Arc<dyn crowdpm_common::ports::PairingSessionStore> =
        Arc::new(PgPairingSessionStore::new(db.pool.clone()));
    let registry: Arc<dyn crowdpm_common::ports::DeviceRegistry> = Arc::new(PgDeviceRegistry::new(db.pool.clone()));
    let batch_store: Arc<dyn crowdpm_common::ports::BatchRecordStore> =
        Arc::new(PgBatchRecordStore::new(db.pool.clone()));
    let visibility_policy: Arc<dyn crowdpm_common::ports::VisibilityPolicy> =
        Arc::new(PgVisibilityPolicy::new(db.pool.clone()));
    let blob_store: Arc<dyn crowdpm_common::ports::BlobStore> = Arc::new(storage);

    let dpop = Arc::new(DpopVerifier::new(
        replay_store.clone(),
        DpopConfig {
            max_skew: Duration::from_secs(config.dpop.max_skew_secs as u64),
            max_age: Duration::from_secs(config.dpop.max_age_secs as u64),
            replay_ttl: Duration::from_secs(config.dpop.replay_ttl_secs),
        },
    ));

    let pairing = Arc::new(PairingCoordinator::new(
        pairing_store,
        registry.clone(),
        rate_limiter.clone(),
        replay_store,
        dpop.clone(),
        token_issuer.clone(),
        PairingConfig {
            session_ttl: Duration::from_secs(config.pairing.session_ttl_secs),
            default_poll_interval: Duration::from_secs(config.pairing.poll_interval_secs),
            verification_uri: config.pairing.device_verification_uri.clone(),
        },
    ));

    let ingest = Arc::new(IngestGateway::new(
        token_issuer.clone(),
        dpop.clone(),
        registry.clone(),
        blob_store,
        batch_store,
        event_bus,
        visibility_policy,
        GatewayConfig {
            events_topic: config.events.topic.clone(),
            max_points_per_batch: config.limits.max_points_per_batch,
        },
    ));

    let api_state = AppState {
        db: db.clone(),
        pairing,
        ingest,
        token_issuer,
        dpop,
        registry,
        rate_limiter,
        human_session_secret: config.human_session.secret.clone(),
    };
    let api_router = build_router(api_state);
    let api_addr = SocketAddr::new(config.server.host.parse()?, config.server.port);

    tracing::info!("REST API listening on http://{api_addr}");
    let listener = tokio::net::TcpListener::bind(api_addr).await?;
    axum::serve(listener, api_router).await?;

    Ok(())
}
