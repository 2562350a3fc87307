//! `/device/*` — the device-authorization-grant pairing flow (C2) plus
//! direct access-token issuance against a registered device's long-term
//! key (C4).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crowdpm_common::error::{CrowdpmError, CrowdpmResult};
use crowdpm_common::ports::DeviceRegistry;
use crowdpm_security::keys::Ed25519Jwk;
use crowdpm_security::tokens::IssueAccessTokenRequest;

use crowdpm_pairing::coordinator::{PollOutcome, RedeemRequest, StartRequest};

use crate::middleware::{asn_hint, client_ip, extract_dpop_header, request_url};
use crate::AppState;

/// Per-device/account/global budgets for `/device/access-token`, mirroring
/// the capacities `crowdpm-pairing`'s `redeem` enforces for the same
/// device/account/global triple (spec.md has no separate numbers for this
/// endpoint, only the `429 rate_limited` contract in §6's HTTP table).
const ACCESS_TOKEN_DEVICE_CAPACITY: u64 = 10;
const ACCESS_TOKEN_ACCOUNT_CAPACITY: u64 = 50;
const ACCESS_TOKEN_GLOBAL_CAPACITY: u64 = 1000;
const ACCESS_TOKEN_WINDOW: Duration = Duration::from_secs(60);

async fn check_rate_limit(state: &AppState, key: String, capacity: u64, window: Duration) -> CrowdpmResult<()> {
    let admitted = state.rate_limiter.consume(&key, capacity, window).await?;
    if !admitted {
        return Err(CrowdpmError::RateLimited { retry_after_ms: window.as_millis() as u64 });
    }
    Ok(())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/device/start", post(start))
        .route("/device/token", post(token))
        .route("/device/register", post(register))
        .route("/device/access-token", post(access_token))
}

#[derive(Debug, Deserialize)]
struct StartBody {
    pub_ke: String,
    model: String,
    version: String,
    #[serde(default)]
    nonce: Option<String>,
}

async fn start(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartBody>,
) -> CrowdpmResult<Json<crowdpm_pairing::coordinator::StartResponse>> {
    let response = state
        .pairing
        .start(StartRequest {
            pub_ke_b64: body.pub_ke,
            model: body.model,
            version: body.version,
            nonce: body.nonce,
            client_ip: client_ip(&headers),
            asn_hint: asn_hint(&headers),
        })
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    device_code: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    registration_token: String,
    expires_in: i64,
}

async fn token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    Json(body): Json<TokenBody>,
) -> CrowdpmResult<Json<TokenResponse>> {
    let dpop_proof = extract_dpop_header(&headers)?;
    let htu = request_url(&headers, &uri);
    let outcome = state.pairing.poll(&body.device_code, &dpop_proof, &htu).await?;
    match outcome {
        PollOutcome::RegistrationToken { token, expires_in } => {
            Ok(Json(TokenResponse { registration_token: token, expires_in }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    jwk_pub_kl: Ed25519Jwk,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    device_id: String,
    jwk_pub_kl: Ed25519Jwk,
    issued_at: chrono::DateTime<chrono::Utc>,
}

async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    Json(body): Json<RegisterBody>,
) -> CrowdpmResult<Json<RegisterResponse>> {
    let registration_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(CrowdpmError::InvalidToken)?
        .to_string();
    let dpop_proof = extract_dpop_header(&headers)?;
    let htu = request_url(&headers, &uri);

    let jwk = body.jwk_pub_kl.clone();
    let result = state
        .pairing
        .redeem(RedeemRequest {
            registration_token,
            dpop_proof,
            request_url: htu,
            pub_kl_jwk: jwk,
        })
        .await?;

    Ok(Json(RegisterResponse {
        device_id: result.device_id,
        jwk_pub_kl: body.jwk_pub_kl,
        issued_at: result.issued_at,
    }))
}

#[derive(Debug, Deserialize)]
struct AccessTokenBody {
    device_id: String,
    #[serde(default)]
    scope: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct AccessTokenResponse {
    token_type: &'static str,
    access_token: String,
    expires_in: i64,
    device_id: String,
}

async fn access_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    Json(body): Json<AccessTokenBody>,
) -> CrowdpmResult<Json<AccessTokenResponse>> {
    let dpop_proof = extract_dpop_header(&headers)?;
    let htu = request_url(&headers, &uri);

    let device = state
        .registry
        .get(&body.device_id)
        .await?
        .ok_or(CrowdpmError::Forbidden)?;
    if !device.registry_status.is_admissible() {
        return Err(CrowdpmError::DeviceForbidden);
    }

    check_rate_limit(
        &state,
        format!("access_token:device:{}", device.device_id),
        ACCESS_TOKEN_DEVICE_CAPACITY,
        ACCESS_TOKEN_WINDOW,
    )
    .await?;
    check_rate_limit(
        &state,
        format!("access_token:account:{}", device.acc_id),
        ACCESS_TOKEN_ACCOUNT_CAPACITY,
        ACCESS_TOKEN_WINDOW,
    )
    .await?;
    check_rate_limit(&state, "access_token:global".to_string(), ACCESS_TOKEN_GLOBAL_CAPACITY, ACCESS_TOKEN_WINDOW)
        .await?;

    state
        .dpop
        .verify(
            &dpop_proof,
            crowdpm_security::dpop::VerifyParams {
                method: "POST",
                htu: &htu,
                expected_thumbprint: Some(&device.pub_kl_thumbprint),
                required_ath: None,
            },
            chrono::Utc::now(),
        )
        .await?;

    let issued = state.token_issuer.issue_access_token(IssueAccessTokenRequest {
        device_id: device.device_id.clone(),
        acc_id: device.acc_id.clone(),
        confirmation_thumbprint: device.pub_kl_thumbprint.clone(),
        scope: body.scope,
    })?;

    let _ = state.registry.touch_last_seen(&device.device_id).await;

    Ok(Json(AccessTokenResponse {
        token_type: "DPoP",
        access_token: issued.token,
        expires_in: issued.expires_in,
        device_id: device.device_id,
    }))
}
