//! # crowdpm-api
//!
//! HTTP surface for crowdpm: the device-authorization-grant pairing flow
//! (C2/C4), the human-facing activation endpoints, and the measurement
//! ingest gateway (C6). Route handlers are thin adapters over
//! `crowdpm-pairing`/`crowdpm-ingest` — all business logic lives there.

pub mod human_session;
pub mod middleware;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::Router;
use tower::ServiceBuilder;

use crowdpm_common::ports::{DeviceRegistry, RateLimiter};
use crowdpm_db::Database;
use crowdpm_ingest::gateway::IngestGateway;
use crowdpm_pairing::coordinator::PairingCoordinator;
use crowdpm_security::dpop::DpopVerifier;
use crowdpm_security::tokens::TokenIssuer;

/// Default per-request deadline (spec.md §5: "everything else = 10s").
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Ingest's wider deadline (spec.md §5: "ingest = 30s").
const INGEST_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state available to all route handlers.
pub struct AppState {
    pub db: Database,
    pub pairing: Arc<PairingCoordinator>,
    pub ingest: Arc<IngestGateway>,
    pub token_issuer: Arc<TokenIssuer>,
    pub dpop: Arc<DpopVerifier>,
    pub registry: Arc<dyn DeviceRegistry>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// HMAC secret for the upstream identity system's human session tokens.
    pub human_session_secret: String,
}

/// Turn a timed-out/panicked inner service into a stable `internal_error`
/// response rather than letting axum's default infallible-error bound reject
/// the layer.
async fn handle_timeout(err: tower::BoxError) -> (StatusCode, axum::Json<serde_json::Value>) {
    tracing::warn!(error = %err, "request exceeded its deadline");
    (
        StatusCode::GATEWAY_TIMEOUT,
        axum::Json(serde_json::json!({ "error": "internal_error", "message": "request timed out" })),
    )
}

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let timed_routes = Router::new()
        .merge(routes::device::router())
        .merge(routes::activation::router())
        .merge(routes::health::router())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout))
                .timeout(DEFAULT_REQUEST_TIMEOUT),
        );

    let ingest_routes = Router::new().merge(routes::ingest::router()).layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_timeout))
            .timeout(INGEST_REQUEST_TIMEOUT),
    );

    Router::new()
        .merge(timed_routes)
        .merge(ingest_routes)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::compression::CompressionLayer::new())
        .with_state(state)
}
