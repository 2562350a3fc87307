//! DPoP (demonstration of proof-of-possession) proof verification.
//!
//! A pure, stateless validator over a single operation: `verify`. The only
//! state it touches is the replay-protection set, which is injected as a
//! [`crowdpm_common::ports::ReplayStore`] so a multi-instance deployment can
//! back it with a shared cache without this module knowing about it.
//!
//! Validation runs the eight ordered checks below; the first failure wins.
//! 1. header shape (`alg=EdDSA`, `typ=dpop+jwt`, embedded OKP/Ed25519 `jwk`)
//! 2. JWK thumbprint computation
//! 3. thumbprint binding, if the caller expects one
//! 4. EdDSA signature over `header.payload`
//! 5. `htm`/`htu` match the request
//! 6. `iat` within the allowed skew/age window
//! 7. `jti` replay check
//! 8. `ath` binding, if the caller requires one

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crowdpm_common::ports::ReplayStore;

use crate::error::SecurityError;
use crate::keys::{verify_signature, Ed25519Jwk};

/// Tunable clock-skew and replay-window parameters. Defaults track
/// `DPOP_MAX_SKEW_SECONDS` / `DPOP_MAX_AGE_SECONDS` from spec.md §6.
#[derive(Debug, Clone, Copy)]
pub struct DpopConfig {
    /// How far into the future a proof's `iat` may sit (clock skew tolerance).
    pub max_skew: Duration,
    /// How far into the past a proof's `iat` may sit before it's stale.
    pub max_age: Duration,
    /// TTL for the replay-protection set entry.
    pub replay_ttl: Duration,
}

impl Default for DpopConfig {
    fn default() -> Self {
        Self {
            max_skew: Duration::from_secs(5),
            max_age: Duration::from_secs(120),
            replay_ttl: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DpopHeader {
    alg: String,
    typ: String,
    jwk: Ed25519Jwk,
}

#[derive(Debug, Deserialize, Serialize)]
struct DpopPayload {
    htm: String,
    htu: String,
    iat: i64,
    jti: String,
    #[serde(default)]
    ath: Option<String>,
}

/// Parameters a caller supplies for one `verify` call.
pub struct VerifyParams<'a> {
    /// Expected HTTP method, e.g. `"POST"`.
    pub method: &'a str,
    /// Expected request URL, exactly as the caller constructed it.
    pub htu: &'a str,
    /// If set, the proof's JWK thumbprint must equal this value.
    pub expected_thumbprint: Option<&'a str>,
    /// If set, the proof's `ath` claim must equal this value
    /// (`base64url(SHA-256(access_token))`).
    pub required_ath: Option<&'a str>,
}

pub struct DpopVerifier {
    replay_store: Arc<dyn ReplayStore>,
    config: DpopConfig,
}

impl DpopVerifier {
    pub fn new(replay_store: Arc<dyn ReplayStore>, config: DpopConfig) -> Self {
        Self { replay_store, config }
    }

    /// Validate `proof_jwt` against `params` as of `now`. Returns the
    /// proof's key thumbprint on success.
    pub async fn verify(
        &self,
        proof_jwt: &str,
        params: VerifyParams<'_>,
        now: DateTime<Utc>,
    ) -> Result<String, SecurityError> {
        // 1. Parse header + payload.
        let mut parts = proof_jwt.split('.');
        let header_b64 = parts.next().ok_or_else(|| malformed("missing header segment"))?;
        let payload_b64 = parts.next().ok_or_else(|| malformed("missing payload segment"))?;
        let sig_b64 = parts.next().ok_or_else(|| malformed("missing signature segment"))?;
        if parts.next().is_some() {
            return Err(malformed("proof has more than three segments"));
        }

        let header: DpopHeader = decode_segment(header_b64)?;
        if header.alg != "EdDSA" {
            return Err(malformed("alg must be EdDSA"));
        }
        if header.typ != "dpop+jwt" {
            return Err(malformed("typ must be dpop+jwt"));
        }

        // 2. Thumbprint.
        let thumbprint = header.jwk.thumbprint()?;

        // 3. Binding.
        if let Some(expected) = params.expected_thumbprint {
            if expected != thumbprint {
                return Err(SecurityError::InvalidBinding);
            }
        }

        // 4. Signature.
        let verifying_key = header.jwk.to_verifying_key()?;
        let signing_input = format!("{header_b64}.{payload_b64}");
        verify_signature(&verifying_key, sig_b64, signing_input.as_bytes())
            .map_err(|_| SecurityError::InvalidSignature)?;

        let payload: DpopPayload = decode_segment(payload_b64)?;

        // 5. htm/htu.
        if !payload.htm.eq_ignore_ascii_case(params.method) {
            return Err(SecurityError::InvalidTarget);
        }
        if !htu_matches(&payload.htu, params.htu) {
            return Err(SecurityError::InvalidTarget);
        }

        // 6. iat window.
        let iat = DateTime::from_timestamp(payload.iat, 0)
            .ok_or_else(|| malformed("iat is not a valid timestamp"))?;
        let skew = chrono::Duration::from_std(self.config.max_skew)
            .map_err(|e| SecurityError::Other(anyhow::anyhow!(e)))?;
        let max_age = chrono::Duration::from_std(self.config.max_age)
            .map_err(|e| SecurityError::Other(anyhow::anyhow!(e)))?;
        if iat > now + skew {
            return Err(SecurityError::StaleProof);
        }
        if iat < now - max_age {
            return Err(SecurityError::StaleProof);
        }

        // 7. Replay.
        if payload.jti.is_empty() {
            return Err(malformed("jti must be non-empty"));
        }
        let replay_key = format!(
            "dpop:{}:{}:{}:{}",
            thumbprint,
            payload.htm.to_uppercase(),
            payload.htu,
            payload.jti
        );
        let first_use = self
            .replay_store
            .check_and_insert(&replay_key, self.config.replay_ttl)
            .await
            .map_err(|e| SecurityError::Other(anyhow::anyhow!(e)))?;
        if !first_use {
            return Err(SecurityError::Replay);
        }

        // 8. ath.
        if let Some(required_ath) = params.required_ath {
            match &payload.ath {
                Some(ath) if ath == required_ath => {}
                _ => return Err(SecurityError::InvalidAth),
            }
        }

        Ok(thumbprint)
    }
}

fn malformed(msg: &str) -> SecurityError {
    SecurityError::MalformedProof(msg.to_string())
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, SecurityError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| malformed("segment is not valid base64url"))?;
    serde_json::from_slice(&bytes).map_err(|e| malformed(&format!("segment is not valid JSON: {e}")))
}

/// Compare `proof_htu` (from the proof payload) against `expected_htu` (the
/// caller-constructed request URL): scheme/host case-insensitive, path and
/// query exact, fragment stripped from both before comparison.
fn htu_matches(proof_htu: &str, expected_htu: &str) -> bool {
    let (Ok(a), Ok(b)) = (url::Url::parse(proof_htu), url::Url::parse(expected_htu)) else {
        return proof_htu == expected_htu;
    };
    a.scheme().eq_ignore_ascii_case(b.scheme())
        && a.host_str().map(|h| h.to_ascii_lowercase()) == b.host_str().map(|h| h.to_ascii_lowercase())
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path() == b.path()
        && a.query() == b.query()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SigningKeyPair;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct InMemoryReplayStore {
        seen: Mutex<std::collections::HashSet<String>>,
    }

    impl InMemoryReplayStore {
        fn new() -> Self {
            Self { seen: Mutex::new(Default::default()) }
        }
    }

    #[async_trait]
    impl ReplayStore for InMemoryReplayStore {
        async fn check_and_insert(
            &self,
            key: &str,
            _ttl: Duration,
        ) -> crowdpm_common::error::CrowdpmResult<bool> {
            Ok(self.seen.lock().unwrap().insert(key.to_string()))
        }
    }

    fn build_proof(kp: &SigningKeyPair, htm: &str, htu: &str, iat: i64, jti: &str, ath: Option<&str>) -> String {
        let jwk = Ed25519Jwk::from_verifying_key(&kp.verifying_key());
        let header = serde_json::json!({ "alg": "EdDSA", "typ": "dpop+jwt", "jwk": jwk });
        let payload = serde_json::json!({ "htm": htm, "htu": htu, "iat": iat, "jti": jti, "ath": ath });
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
        let signing_input = format!("{header_b64}.{payload_b64}");
        let sig_b64 = kp.sign_bytes(signing_input.as_bytes());
        format!("{header_b64}.{payload_b64}.{sig_b64}")
    }

    #[tokio::test]
    async fn accepts_a_fresh_well_formed_proof() {
        let kp = SigningKeyPair::generate();
        let now = Utc::now();
        let proof = build_proof(&kp, "POST", "https://api.example/device/token", now.timestamp(), "jti-1", None);
        let verifier = DpopVerifier::new(Arc::new(InMemoryReplayStore::new()), DpopConfig::default());
        let thumbprint = verifier
            .verify(
                &proof,
                VerifyParams { method: "POST", htu: "https://api.example/device/token", expected_thumbprint: None, required_ath: None },
                now,
            )
            .await
            .expect("proof should verify");
        let expected = Ed25519Jwk::from_verifying_key(&kp.verifying_key()).thumbprint().unwrap();
        assert_eq!(thumbprint, expected);
    }

    #[tokio::test]
    async fn rejects_replayed_jti() {
        let kp = SigningKeyPair::generate();
        let now = Utc::now();
        let proof = build_proof(&kp, "POST", "https://api.example/ingest", now.timestamp(), "jti-dup", None);
        let verifier = DpopVerifier::new(Arc::new(InMemoryReplayStore::new()), DpopConfig::default());
        let params = || VerifyParams { method: "POST", htu: "https://api.example/ingest", expected_thumbprint: None, required_ath: None };
        verifier.verify(&proof, params(), now).await.expect("first use accepted");
        let err = verifier.verify(&proof, params(), now).await.unwrap_err();
        assert!(matches!(err, SecurityError::Replay));
    }

    #[tokio::test]
    async fn rejects_stale_iat() {
        let kp = SigningKeyPair::generate();
        let now = Utc::now();
        let stale_iat = (now - chrono::Duration::seconds(121)).timestamp();
        let proof = build_proof(&kp, "POST", "https://api.example/ingest", stale_iat, "jti-stale", None);
        let verifier = DpopVerifier::new(Arc::new(InMemoryReplayStore::new()), DpopConfig::default());
        let err = verifier
            .verify(
                &proof,
                VerifyParams { method: "POST", htu: "https://api.example/ingest", expected_thumbprint: None, required_ath: None },
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::StaleProof));
    }

    #[tokio::test]
    async fn accepts_iat_119s_old() {
        let kp = SigningKeyPair::generate();
        let now = Utc::now();
        let iat = (now - chrono::Duration::seconds(119)).timestamp();
        let proof = build_proof(&kp, "POST", "https://api.example/ingest", iat, "jti-119", None);
        let verifier = DpopVerifier::new(Arc::new(InMemoryReplayStore::new()), DpopConfig::default());
        verifier
            .verify(
                &proof,
                VerifyParams { method: "POST", htu: "https://api.example/ingest", expected_thumbprint: None, required_ath: None },
                now,
            )
            .await
            .expect("119s old proof should be accepted");
    }

    #[tokio::test]
    async fn rejects_wrong_thumbprint_binding() {
        let kp = SigningKeyPair::generate();
        let now = Utc::now();
        let proof = build_proof(&kp, "POST", "https://api.example/device/register", now.timestamp(), "jti-bind", None);
        let verifier = DpopVerifier::new(Arc::new(InMemoryReplayStore::new()), DpopConfig::default());
        let err = verifier
            .verify(
                &proof,
                VerifyParams {
                    method: "POST",
                    htu: "https://api.example/device/register",
                    expected_thumbprint: Some("not-the-real-thumbprint"),
                    required_ath: None,
                },
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::InvalidBinding));
    }

    #[tokio::test]
    async fn requires_matching_ath_when_demanded() {
        let kp = SigningKeyPair::generate();
        let now = Utc::now();
        let proof = build_proof(&kp, "POST", "https://api.example/ingestGateway", now.timestamp(), "jti-ath", Some("expected-ath"));
        let verifier = DpopVerifier::new(Arc::new(InMemoryReplayStore::new()), DpopConfig::default());
        let ok = verifier
            .verify(
                &proof,
                VerifyParams { method: "POST", htu: "https://api.example/ingestGateway", expected_thumbprint: None, required_ath: Some("expected-ath") },
                now,
            )
            .await;
        assert!(ok.is_ok());
    }
}
