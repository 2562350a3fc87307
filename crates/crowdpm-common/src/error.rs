//! Centralized error types.
//!
//! Uses `thiserror` for ergonomic error definitions and provides HTTP-friendly
//! error variants that convert directly into API responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Core application error type used across all crowdpm services.
#[derive(Debug, thiserror::Error)]
pub enum CrowdpmError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("device_id in the body does not match the authenticated device")]
    DeviceMismatch,

    #[error("authorization pending")]
    AuthorizationPending,

    #[error("slow down")]
    SlowDown { retry_after_secs: u64 },

    #[error("token expired")]
    ExpiredToken,

    #[error("invalid DPoP proof: {0}")]
    InvalidProof(String),

    #[error("DPoP proof is not bound to the presented token")]
    InvalidBinding,

    #[error("DPoP proof htm/htu does not match the request")]
    InvalidTarget,

    #[error("DPoP proof iat is outside the allowed skew/age window")]
    StaleProof,

    #[error("DPoP proof jti has already been used")]
    Replay,

    #[error("DPoP proof ath does not match the presented access token")]
    InvalidAth,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("invalid or unknown token")]
    InvalidToken,

    #[error("forbidden")]
    Forbidden,

    #[error("device is suspended or revoked")]
    DeviceForbidden,

    #[error("rate limited")]
    RateLimited { retry_after_ms: u64 },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{resource} already exists")]
    AlreadyExists { resource: String },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body sent to clients.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
    /// Only present on `slow_down`: the new polling cadence the device
    /// should honor, in seconds, per spec.md's `/device/token` contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    poll_interval: Option<u64>,
}

impl CrowdpmError {
    /// Map error to HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidPayload(_) | Self::DeviceMismatch => {
                StatusCode::BAD_REQUEST
            }
            Self::AuthorizationPending => StatusCode::BAD_REQUEST,
            Self::SlowDown { .. } => StatusCode::BAD_REQUEST,
            Self::ExpiredToken
            | Self::InvalidToken
            | Self::InvalidSignature
            | Self::InvalidProof(_)
            | Self::InvalidBinding
            | Self::InvalidTarget
            | Self::StaleProof
            | Self::Replay
            | Self::InvalidAth => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::DeviceForbidden => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::AlreadyExists { .. } => StatusCode::CONFLICT,
            Self::StorageError(_) | Self::Database(_) | Self::Redis(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Error code string, matches the taxonomy the ingest/pairing/token
    /// surfaces report on the wire.
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::DeviceMismatch => "device_mismatch",
            Self::AuthorizationPending => "authorization_pending",
            Self::SlowDown { .. } => "slow_down",
            Self::ExpiredToken => "expired_token",
            Self::InvalidProof(_) => "invalid_proof",
            Self::InvalidBinding => "invalid_proof_binding",
            Self::InvalidTarget => "invalid_proof_target",
            Self::StaleProof => "stale_proof",
            Self::Replay => "replay",
            Self::InvalidAth => "invalid_ath",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidToken => "invalid_token",
            Self::Forbidden => "forbidden",
            Self::DeviceForbidden => "device_forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::StorageError(_) => "storage_error",
            Self::Database(_) | Self::Redis(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for CrowdpmError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            Self::Database(e) => {
                tracing::error!("database error: {e}");
                "an internal error occurred".to_string()
            }
            Self::Redis(e) => {
                tracing::error!("redis error: {e}");
                "an internal error occurred".to_string()
            }
            Self::Internal(e) => {
                tracing::error!("internal error: {e:#}");
                "an internal error occurred".to_string()
            }
            Self::StorageError(e) => {
                tracing::error!("storage error: {e}");
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let retry_after_ms = match &self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        };
        let poll_interval = match &self {
            Self::SlowDown { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.error_code().to_string(),
            message,
            retry_after_ms,
            poll_interval,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results using CrowdpmError.
pub type CrowdpmResult<T> = Result<T, CrowdpmError>;
