//! Security-crate-specific error types.

use thiserror::Error;

/// Errors that can occur in key management, DPoP verification, or token
/// issuance.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("failed to generate signing key: {0}")]
    KeyGeneration(String),

    #[error("failed to load signing key: {0}")]
    KeyLoad(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("malformed DPoP proof: {0}")]
    MalformedProof(String),

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

    #[error("token expired")]
    TokenExpired,

    #[error("invalid or unknown token")]
    InvalidToken,

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<crate::error::SecurityError> for crowdpm_common::error::CrowdpmError {
    fn from(e: SecurityError) -> Self {
        use crowdpm_common::error::CrowdpmError as E;
        match e {
            SecurityError::KeyGeneration(msg) | SecurityError::KeyLoad(msg) => {
                E::Internal(anyhow::anyhow!(msg))
            }
            SecurityError::InvalidSignature => E::InvalidSignature,
            SecurityError::MalformedProof(msg) => E::InvalidProof(msg),
            SecurityError::InvalidBinding => E::InvalidBinding,
            SecurityError::InvalidTarget => E::InvalidTarget,
            SecurityError::StaleProof => E::StaleProof,
            SecurityError::Replay => E::Replay,
            SecurityError::InvalidAth => E::InvalidAth,
            SecurityError::TokenExpired => E::ExpiredToken,
            SecurityError::InvalidToken => E::InvalidToken,
            SecurityError::Serialisation(err) => E::InvalidPayload(err.to_string()),
            SecurityError::Other(err) => E::Internal(err),
        }
    }
}
