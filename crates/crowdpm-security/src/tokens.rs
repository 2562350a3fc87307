//! Registration and device access token issuance and verification.
//!
//! Both token kinds are EdDSA-signed bearer JWTs carrying a `cnf.jkt`
//! confirmation claim that binds the token to a specific Ed25519 public-key
//! thumbprint (RFC 7800 / RFC 9449). The issuer never persists issued
//! tokens — replay protection relies on the short TTL plus the DPoP `jti` +
//! `cnf.jkt` binding enforced at verification time by [`crate::dpop`]; the
//! pairing coordinator additionally records a single-use `jti` per
//! registration token to prevent double-redeem.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SecurityError;
use crate::keys::SigningKeyPair;

const ISSUER: &str = "crowdpm";
const REGISTRATION_AUD: &str = "device_register";
const ACCESS_AUD: &str = "device_ingest";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confirmation {
    pub jkt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationClaims {
    pub iss: String,
    pub aud: String,
    pub kind: String,
    pub device_code: String,
    pub acc_id: String,
    pub session_id: String,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub cnf: Confirmation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub iss: String,
    pub aud: String,
    pub kind: String,
    pub device_id: String,
    pub acc_id: String,
    pub scope: Vec<String>,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub cnf: Confirmation,
}

pub struct IssuedToken<C> {
    pub token: String,
    pub jti: Uuid,
    pub expires_in: i64,
    pub claims: C,
}

pub struct IssueRegistrationTokenRequest {
    pub device_code: String,
    pub acc_id: String,
    pub session_id: String,
    pub confirmation_thumbprint: String,
}

pub struct IssueAccessTokenRequest {
    pub device_id: String,
    pub acc_id: String,
    pub confirmation_thumbprint: String,
    pub scope: Option<Vec<String>>,
}

/// Signing key holder plus TTL configuration. Mints and verifies both
/// token kinds with a single process-wide Ed25519 key.
pub struct TokenIssuer {
    signing_key: Arc<SigningKeyPair>,
    registration_ttl: Duration,
    access_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(signing_key: Arc<SigningKeyPair>, registration_ttl: Duration, access_ttl: Duration) -> Self {
        Self { signing_key, registration_ttl, access_ttl }
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ed_der(&self.signing_key.to_pkcs8_der())
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_ed_der(&self.signing_key.to_public_der())
    }

    pub fn issue_registration_token(
        &self,
        req: IssueRegistrationTokenRequest,
    ) -> Result<IssuedToken<RegistrationClaims>, SecurityError> {
        let now = Utc::now();
        let jti = Uuid::new_v4();
        let exp = now + chrono::Duration::from_std(self.registration_ttl)
            .map_err(|e| SecurityError::Other(anyhow::anyhow!(e)))?;
        let claims = RegistrationClaims {
            iss: ISSUER.to_string(),
            aud: REGISTRATION_AUD.to_string(),
            kind: "registration".to_string(),
            device_code: req.device_code,
            acc_id: req.acc_id,
            session_id: req.session_id,
            jti,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            cnf: Confirmation { jkt: req.confirmation_thumbprint },
        };
        let token = encode(&Header::new(Algorithm::EdDSA), &claims, &self.encoding_key())
            .map_err(|e| SecurityError::Other(anyhow::anyhow!(e)))?;
        Ok(IssuedToken { token, jti, expires_in: self.registration_ttl.as_secs() as i64, claims })
    }

    pub fn issue_access_token(
        &self,
        req: IssueAccessTokenRequest,
    ) -> Result<IssuedToken<AccessClaims>, SecurityError> {
        let now = Utc::now();
        let jti = Uuid::new_v4();
        let exp = now + chrono::Duration::from_std(self.access_ttl)
            .map_err(|e| SecurityError::Other(anyhow::anyhow!(e)))?;
        let mut scope = req.scope.unwrap_or_default();
        if !scope.iter().any(|s| s == "ingest.write") {
            scope.push("ingest.write".to_string());
        }
        let claims = AccessClaims {
            iss: ISSUER.to_string(),
            aud: ACCESS_AUD.to_string(),
            kind: "access".to_string(),
            device_id: req.device_id,
            acc_id: req.acc_id,
            scope,
            jti,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            cnf: Confirmation { jkt: req.confirmation_thumbprint },
        };
        let token = encode(&Header::new(Algorithm::EdDSA), &claims, &self.encoding_key())
            .map_err(|e| SecurityError::Other(anyhow::anyhow!(e)))?;
        Ok(IssuedToken { token, jti, expires_in: self.access_ttl.as_secs() as i64, claims })
    }

    pub fn verify_registration_token(&self, token: &str) -> Result<RegistrationClaims, SecurityError> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_audience(&[REGISTRATION_AUD]);
        validation.set_issuer(&[ISSUER]);
        let data = decode::<RegistrationClaims>(token, &self.decoding_key(), &validation)
            .map_err(|e| map_jwt_error(&e))?;
        if data.claims.kind != "registration" {
            return Err(SecurityError::InvalidToken);
        }
        Ok(data.claims)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, SecurityError> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_audience(&[ACCESS_AUD]);
        validation.set_issuer(&[ISSUER]);
        let data = decode::<AccessClaims>(token, &self.decoding_key(), &validation)
            .map_err(|e| map_jwt_error(&e))?;
        if data.claims.kind != "access" {
            return Err(SecurityError::InvalidToken);
        }
        Ok(data.claims)
    }
}

fn map_jwt_error(err: &jsonwebtoken::errors::Error) -> SecurityError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => SecurityError::TokenExpired,
        _ => SecurityError::InvalidToken,
    }
}
