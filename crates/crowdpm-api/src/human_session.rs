//! Human account session verification for the device-activation endpoints.
//!
//! Account login and MFA enrollment are out of scope here — this module
//! only verifies a session token minted by whatever upstream identity
//! system authenticates the human approving a pairing request, and enforces
//! that the session's MFA assertion is fresh enough to authorize a new
//! device. A stale assertion is treated as no assertion at all.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crowdpm_common::error::CrowdpmError;

use crate::AppState;

/// How long after `mfa_verified_at` an account's MFA assertion is still
/// considered fresh enough to approve a device pairing.
pub const MFA_FRESHNESS_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HumanSessionClaims {
    sub: String,
    mfa_verified_at: i64,
    exp: i64,
}

/// A verified, MFA-fresh human account session.
#[derive(Debug, Clone)]
pub struct HumanSession {
    pub acc_id: String,
}

impl FromRequestParts<Arc<AppState>> for HumanSession {
    type Rejection = CrowdpmError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(CrowdpmError::InvalidToken)?;
        let token = header_value.strip_prefix("Bearer ").ok_or(CrowdpmError::InvalidToken)?;

        let mut validation = Validation::default();
        validation.set_audience(&["human_session"]);
        let data = decode::<HumanSessionClaims>(
            token,
            &DecodingKey::from_secret(state.human_session_secret.as_bytes()),
            &validation,
        )
        .map_err(|_| CrowdpmError::InvalidToken)?;

        let now = Utc::now().timestamp();
        if now - data.claims.mfa_verified_at > MFA_FRESHNESS_WINDOW_SECS {
            return Err(CrowdpmError::Forbidden);
        }

        Ok(HumanSession { acc_id: data.claims.sub })
    }
}
