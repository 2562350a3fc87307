//! Application configuration loaded from environment variables and config files.
//!
//! Config precedence: env vars > .env file > config.toml > defaults

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG.get().expect("Config not initialized. Call crowdpm_common::config::init() first.")
}

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup, before any other code accesses config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("database.max_connections", 20)?
        .set_default("database.min_connections", 5)?
        .set_default("redis.url", "redis://127.0.0.1:6379")?
        .set_default("pairing.session_ttl_secs", 900)?
        .set_default("pairing.poll_interval_secs", 5)?
        .set_default("pairing.min_poll_interval_secs", 5)?
        .set_default("pairing.device_verification_uri", "https://pair.crowdpm.example/device")?
        .set_default("token.registration_ttl_secs", 60)?
        .set_default("token.access_ttl_secs", 600)?
        .set_default("token.signing_private_key", "")?
        .set_default("dpop.max_skew_secs", 5)?
        .set_default("dpop.max_age_secs", 120)?
        .set_default("dpop.replay_ttl_secs", 180)?
        .set_default("storage.endpoint", "")?
        .set_default("storage.bucket", "crowdpm-ingest")?
        .set_default("storage.access_key", "")?
        .set_default("storage.secret_key", "")?
        .set_default("storage.region", "us-east-1")?
        .set_default("events.topic", "ingest.raw")?
        .set_default("limits.max_ingest_body_bytes", 1_048_576)?
        .set_default("limits.max_points_per_batch", 500)?
        .set_default("human_session.secret", "")?
        .add_source(config::File::with_name("config").required(false))
        .add_source(
            config::Environment::with_prefix("CROWDPM")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub pairing: PairingConfig,
    pub token: TokenConfig,
    pub dpop: DpopConfig,
    pub storage: StorageConfig,
    pub events: EventsConfig,
    pub limits: LimitsConfig,
    pub human_session: HumanSessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PairingConfig {
    /// Seconds a pairing session remains valid before expiry.
    pub session_ttl_secs: u64,
    /// Default poll cadence handed to the device in `start`'s response.
    pub poll_interval_secs: u64,
    /// Floor below which polling triggers `slow_down`.
    pub min_poll_interval_secs: u64,
    /// Human-facing verification URL returned alongside the user code.
    pub device_verification_uri: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    /// Registration token TTL in seconds.
    pub registration_ttl_secs: u64,
    /// Device access token TTL in seconds.
    pub access_ttl_secs: u64,
    /// Base64-encoded Ed25519 private key seed. Empty string falls back to
    /// DB-backed load-or-generate (see `crowdpm_security::signing_key`).
    pub signing_private_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DpopConfig {
    /// Maximum allowed clock skew between `iat` and server time, in seconds.
    pub max_skew_secs: i64,
    /// Maximum age of a proof before it is considered stale, in seconds.
    pub max_age_secs: i64,
    /// TTL for the replay-protection set entry, in seconds.
    pub replay_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// S3/MinIO endpoint URL.
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    /// Pub/sub topic/channel that accepted ingest batches are announced on.
    pub topic: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    pub max_ingest_body_bytes: u64,
    pub max_points_per_batch: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HumanSessionConfig {
    /// HMAC secret verifying the upstream identity system's session tokens
    /// presented on the device-activation endpoints.
    pub secret: String,
}
