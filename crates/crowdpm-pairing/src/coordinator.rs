//! C2 Pairing Coordinator — the device-authorization-grant state machine
//! driving `start` -> `poll`/`approve` -> `redeem`.
//!
//! All four operations are built entirely on top of the injected port
//! traits; this module owns no storage of its own. Every state transition
//! that can race (cadence enforcement, approval, redemption) goes through
//! [`crowdpm_common::ports::PairingSessionStore::update`], which serializes
//! concurrent callers against the same `device_code` row.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crowdpm_common::error::{CrowdpmError, CrowdpmResult};
use crowdpm_common::ids::{
    generate_device_code, generate_user_code, validate_user_code_checksum,
};
use crowdpm_common::models::device::RegisterDeviceRequest;
use crowdpm_common::models::pairing::{PairingSession, PairingSessionStatus, PairingSessionView};
use crowdpm_common::ports::{DeviceRegistry, PairingSessionStore, RateLimiter, ReplayStore};

use crowdpm_security::dpop::{DpopVerifier, VerifyParams};
use crowdpm_security::keys::Ed25519Jwk;
use crowdpm_security::tokens::{IssueRegistrationTokenRequest, TokenIssuer};

use crate::net::coarsen_ip;

const START_IP_CAPACITY: u64 = 10;
const START_ASN_CAPACITY: u64 = 50;
const START_MODEL_CAPACITY: u64 = 200;
const START_GLOBAL_CAPACITY: u64 = 500;
const WINDOW_60S: Duration = Duration::from_secs(60);

const POLL_DEVICE_CAPACITY: u64 = 15;
const POLL_GLOBAL_CAPACITY: u64 = 1000;

const REDEEM_DEVICE_CAPACITY: u64 = 10;
const REDEEM_ACCOUNT_CAPACITY: u64 = 50;
const REDEEM_GLOBAL_CAPACITY: u64 = 1000;

const MAX_POLL_INTERVAL_SECS: i32 = 30;
const USER_CODE_CREATE_ATTEMPTS: usize = 5;
const REGISTRATION_JTI_GUARD_TTL: Duration = Duration::from_secs(3600);

/// Static configuration for the coordinator, distinct from the per-proof
/// tuning that lives in [`crowdpm_security::dpop::DpopConfig`].
#[derive(Debug, Clone)]
pub struct PairingConfig {
    pub session_ttl: Duration,
    pub default_poll_interval: Duration,
    pub verification_uri: String,
}

pub struct StartRequest {
    /// Base64url-encoded, unpadded raw 32-byte Ed25519 public key.
    pub pub_ke_b64: String,
    pub model: String,
    pub version: String,
    pub nonce: Option<String>,
    pub client_ip: Option<IpAddr>,
    pub asn_hint: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StartResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub poll_interval: u64,
    pub expires_in: u64,
}

/// What a successful `poll` call hands back to the device.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    RegistrationToken { token: String, expires_in: i64 },
}

pub struct RedeemRequest {
    pub registration_token: String,
    pub dpop_proof: String,
    pub request_url: String,
    pub pub_kl_jwk: Ed25519Jwk,
}

#[derive(Debug, Clone)]
pub struct RedeemResponse {
    pub device_id: String,
    pub issued_at: DateTime<Utc>,
}

pub struct PairingCoordinator {
    store: Arc<dyn PairingSessionStore>,
    registry: Arc<dyn DeviceRegistry>,
    rate_limiter: Arc<dyn RateLimiter>,
    replay_store: Arc<dyn ReplayStore>,
    dpop: Arc<DpopVerifier>,
    token_issuer: Arc<TokenIssuer>,
    config: PairingConfig,
}

impl PairingCoordinator {
    pub fn new(
        store: Arc<dyn PairingSessionStore>,
        registry: Arc<dyn DeviceRegistry>,
        rate_limiter: Arc<dyn RateLimiter>,
        replay_store: Arc<dyn ReplayStore>,
        dpop: Arc<DpopVerifier>,
        token_issuer: Arc<TokenIssuer>,
        config: PairingConfig,
    ) -> Self {
        Self { store, registry, rate_limiter, replay_store, dpop, token_issuer, config }
    }

    async fn check_rate_limit(&self, key: String, capacity: u64, window: Duration) -> CrowdpmResult<()> {
        let admitted = self.rate_limiter.consume(&key, capacity, window).await?;
        if !admitted {
            return Err(CrowdpmError::RateLimited { retry_after_ms: window.as_millis() as u64 });
        }
        Ok(())
    }

    /// C2 `start`: mint a fresh device_code/user_code pair for an
    /// unauthenticated device presenting its ephemeral pairing key.
    pub async fn start(&self, req: StartRequest) -> CrowdpmResult<StartResponse> {
        let ip_key = req.client_ip.map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".to_string());
        self.check_rate_limit(format!("start:ip:{ip_key}"), START_IP_CAPACITY, WINDOW_60S).await?;
        if let Some(ref asn) = req.asn_hint {
            self.check_rate_limit(format!("start:asn:{asn}"), START_ASN_CAPACITY, WINDOW_60S).await?;
        }
        self.check_rate_limit(format!("start:model:{}", req.model), START_MODEL_CAPACITY, WINDOW_60S).await?;
        self.check_rate_limit("start:global".to_string(), START_GLOBAL_CAPACITY, WINDOW_60S).await?;

        let raw = URL_SAFE_NO_PAD
            .decode(&req.pub_ke_b64)
            .map_err(|_| CrowdpmError::InvalidRequest("pub_ke is not valid base64url".into()))?;
        let key_bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CrowdpmError::InvalidRequest("pub_ke must be exactly 32 bytes".into()))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| CrowdpmError::InvalidRequest("pub_ke is not a valid Ed25519 point".into()))?;
        let jwk = Ed25519Jwk::from_verifying_key(&verifying_key);
        let pub_ke_thumbprint = jwk.thumbprint()?;
        let fingerprint = hex::encode(&Sha256::digest(key_bytes)[..4]);

        let now = Utc::now();
        let requester_ip_coarsened = req.client_ip.map(coarsen_ip);
        let expires_at = now
            + chrono::Duration::from_std(self.config.session_ttl)
                .map_err(|e| CrowdpmError::Internal(anyhow::anyhow!(e)))?;
        let poll_interval_secs = self.config.default_poll_interval.as_secs() as i32;

        for attempt in 0..USER_CODE_CREATE_ATTEMPTS {
            let session = PairingSession {
                device_code: generate_device_code(),
                user_code: generate_user_code(),
                pub_ke_thumbprint: pub_ke_thumbprint.clone(),
                pub_ke_jwk: serde_json::to_value(&jwk).map_err(|e| CrowdpmError::Internal(anyhow::anyhow!(e)))?,
                fingerprint: fingerprint.clone(),
                model: req.model.clone(),
                version: req.version.clone(),
                nonce: req.nonce.clone(),
                requester_ip_coarsened: requester_ip_coarsened.clone(),
                requester_asn_hint: req.asn_hint.clone(),
                status: PairingSessionStatus::Pending,
                acc_id: None,
                poll_interval_secs,
                last_poll_at: None,
                expires_at,
                created_at: now,
                registration_token_jti: None,
                registration_token_expires_at: None,
            };

            match self.store.create(session).await? {
                Some(created) => {
                    return Ok(StartResponse {
                        device_code: created.device_code,
                        verification_uri_complete: format!(
                            "{}?user_code={}",
                            self.config.verification_uri, created.user_code
                        ),
                        user_code: created.user_code,
                        verification_uri: self.config.verification_uri.clone(),
                        poll_interval: created.poll_interval_secs as u64,
                        expires_in: self.config.session_ttl.as_secs(),
                    });
                }
                None if attempt + 1 < USER_CODE_CREATE_ATTEMPTS => continue,
                None => {
                    return Err(CrowdpmError::Internal(anyhow::anyhow!(
                        "exhausted user_code/device_code collision retries"
                    )))
                }
            }
        }
        unreachable!("loop always returns or errors")
    }

    /// C2 `poll`: the device asks whether a human has approved its session
    /// yet. Enforces the escalating slow-down cadence and, once authorized,
    /// mints a one-time registration token.
    pub async fn poll(&self, device_code: &str, dpop_proof: &str, request_url: &str) -> CrowdpmResult<PollOutcome> {
        self.check_rate_limit(format!("poll:device:{device_code}"), POLL_DEVICE_CAPACITY, Duration::from_secs(60))
            .await?;
        self.check_rate_limit("poll:global".to_string(), POLL_GLOBAL_CAPACITY, Duration::from_secs(60)).await?;

        let now = Utc::now();
        let session = self
            .store
            .get_by_device_code(device_code)
            .await?
            .ok_or_else(|| CrowdpmError::InvalidRequest("unknown device_code".into()))?;

        if is_terminal(session.status) {
            return Err(CrowdpmError::ExpiredToken);
        }
        if now >= session.expires_at {
            let device_code_owned = device_code.to_string();
            self.store
                .update(
                    &device_code_owned,
                    Box::new(move |s| {
                        let mut n = s.clone();
                        n.status = PairingSessionStatus::Expired;
                        Some(n)
                    }),
                )
                .await?;
            return Err(CrowdpmError::ExpiredToken);
        }

        self.dpop
            .verify(
                dpop_proof,
                VerifyParams {
                    method: "POST",
                    htu: request_url,
                    expected_thumbprint: Some(&session.pub_ke_thumbprint),
                    required_ath: None,
                },
                now,
            )
            .await?;

        let updated = self
            .store
            .update(
                device_code,
                Box::new(move |s| {
                    let mut n = s.clone();
                    if let Some(last) = s.last_poll_at {
                        let min_gap = chrono::Duration::seconds(s.poll_interval_secs as i64);
                        if now - last < min_gap {
                            n.poll_interval_secs = (s.poll_interval_secs * 2).min(MAX_POLL_INTERVAL_SECS);
                            return Some(n);
                        }
                    }
                    n.last_poll_at = Some(now);
                    Some(n)
                }),
            )
            .await?
            .ok_or_else(|| CrowdpmError::InvalidRequest("unknown device_code".into()))?;

        if updated.last_poll_at != Some(now) {
            return Err(CrowdpmError::SlowDown { retry_after_secs: updated.poll_interval_secs as u64 });
        }

        match updated.status {
            PairingSessionStatus::Pending => Err(CrowdpmError::AuthorizationPending),
            PairingSessionStatus::Redeemed | PairingSessionStatus::Expired => Err(CrowdpmError::ExpiredToken),
            PairingSessionStatus::Authorized => {
                let acc_id = updated
                    .acc_id
                    .clone()
                    .ok_or_else(|| CrowdpmError::Internal(anyhow::anyhow!("authorized session missing acc_id")))?;
                let issued = self.token_issuer.issue_registration_token(IssueRegistrationTokenRequest {
                    device_code: device_code.to_string(),
                    acc_id,
                    session_id: device_code.to_string(),
                    confirmation_thumbprint: updated.pub_ke_thumbprint.clone(),
                })?;

                let jti = issued.jti;
                let expires_in = issued.expires_in;
                self.store
                    .update(
                        device_code,
                        Box::new(move |s| {
                            let mut n = s.clone();
                            n.registration_token_jti = Some(jti);
                            n.registration_token_expires_at = Some(now + chrono::Duration::seconds(expires_in));
                            Some(n)
                        }),
                    )
                    .await?;

                Ok(PollOutcome::RegistrationToken { token: issued.token, expires_in })
            }
        }
    }

    /// Read-only session lookup for the human-facing activation page.
    /// Not part of C2's state-machine operations — a thin projection the
    /// HTTP layer needs to render the approval screen.
    pub async fn get_session_view(&self, user_code: &str) -> CrowdpmResult<PairingSessionView> {
        let bare = validate_user_code_checksum(user_code)
            .ok_or_else(|| CrowdpmError::InvalidRequest("user_code failed checksum validation".into()))?;
        let display = format!("{}-{}-{}", &bare[0..5], &bare[5..10], &bare[10..11]);
        let session = self
            .store
            .get_by_user_code(&display)
            .await?
            .ok_or_else(|| CrowdpmError::NotFound { resource: "pairing session".into() })?;
        Ok(PairingSessionView::from(&session))
    }

    /// C2 `approve`: an authenticated human approves the session named by
    /// `user_code` on behalf of `acc_id`.
    pub async fn approve(&self, user_code: &str, acc_id: &str) -> CrowdpmResult<PairingSessionView> {
        let bare = validate_user_code_checksum(user_code)
            .ok_or_else(|| CrowdpmError::InvalidRequest("user_code failed checksum validation".into()))?;
        let display = format!("{}-{}-{}", &bare[0..5], &bare[5..10], &bare[10..11]);

        let existing = self
            .store
            .get_by_user_code(&display)
            .await?
            .ok_or_else(|| CrowdpmError::NotFound { resource: "pairing session".into() })?;

        let now = Utc::now();
        if is_terminal(existing.status) || now >= existing.expires_at {
            return Err(CrowdpmError::ExpiredToken);
        }
        if let Some(ref bound_acc) = existing.acc_id {
            if bound_acc != acc_id {
                return Err(CrowdpmError::Forbidden);
            }
        }

        let acc_id_owned = acc_id.to_string();
        let updated = self
            .store
            .update(
                &existing.device_code,
                Box::new(move |s| {
                    if s.status != PairingSessionStatus::Pending {
                        return None;
                    }
                    let mut n = s.clone();
                    n.status = PairingSessionStatus::Authorized;
                    n.acc_id = Some(acc_id_owned);
                    Some(n)
                }),
            )
            .await?
            .ok_or_else(|| CrowdpmError::NotFound { resource: "pairing session".into() })?;

        if updated.status != PairingSessionStatus::Authorized {
            return Err(CrowdpmError::ExpiredToken);
        }

        Ok(PairingSessionView::from(&updated))
    }

    /// C2/C4 `redeem`: exchange a valid, unused registration token plus a
    /// freshly-minted long-term key for a registered `device_id`.
    pub async fn redeem(&self, req: RedeemRequest) -> CrowdpmResult<RedeemResponse> {
        let claims = self.token_issuer.verify_registration_token(&req.registration_token)?;
        let now = Utc::now();

        self.check_rate_limit(
            format!("redeem:device:{}", claims.device_code),
            REDEEM_DEVICE_CAPACITY,
            Duration::from_secs(60),
        )
        .await?;
        self.check_rate_limit(
            format!("redeem:account:{}", claims.acc_id),
            REDEEM_ACCOUNT_CAPACITY,
            Duration::from_secs(60),
        )
        .await?;
        self.check_rate_limit("redeem:global".to_string(), REDEEM_GLOBAL_CAPACITY, Duration::from_secs(60)).await?;

        self.dpop
            .verify(
                &req.dpop_proof,
                VerifyParams {
                    method: "POST",
                    htu: &req.request_url,
                    expected_thumbprint: Some(&claims.cnf.jkt),
                    required_ath: None,
                },
                now,
            )
            .await?;

        let session = self
            .store
            .get_by_device_code(&claims.device_code)
            .await?
            .ok_or(CrowdpmError::ExpiredToken)?;

        let claims_match = session.status == PairingSessionStatus::Authorized
            && session.acc_id.as_deref() == Some(claims.acc_id.as_str())
            && session.registration_token_jti == Some(claims.jti)
            && session.registration_token_expires_at.is_some_and(|exp| exp > now);
        if !claims_match {
            return Err(CrowdpmError::ExpiredToken);
        }

        let first_use = self
            .replay_store
            .check_and_insert(&format!("register-jti:{}", claims.jti), REGISTRATION_JTI_GUARD_TTL)
            .await?;
        if !first_use {
            return Err(CrowdpmError::ExpiredToken);
        }

        if req.pub_kl_jwk.kty != "OKP" || req.pub_kl_jwk.crv != "Ed25519" {
            return Err(CrowdpmError::InvalidRequest("pub_kl must be kty=OKP crv=Ed25519".into()));
        }
        let pub_kl_thumbprint = req.pub_kl_jwk.thumbprint()?;

        let device = self
            .registry
            .register(RegisterDeviceRequest {
                acc_id: claims.acc_id.clone(),
                model: session.model.clone(),
                version: session.version.clone(),
                pub_kl_jwk: serde_json::to_value(&req.pub_kl_jwk).map_err(|e| CrowdpmError::Internal(anyhow::anyhow!(e)))?,
                pub_kl_thumbprint,
                ke_thumbprint: session.pub_ke_thumbprint.clone(),
                pairing_device_code: session.device_code.clone(),
                fingerprint: session.fingerprint.clone(),
            })
            .await?;

        let device_code_owned = session.device_code.clone();
        self.store
            .update(
                &device_code_owned,
                Box::new(move |s| {
                    let mut n = s.clone();
                    n.status = PairingSessionStatus::Redeemed;
                    Some(n)
                }),
            )
            .await?;

        Ok(RedeemResponse { device_id: device.device_id, issued_at: device.created_at })
    }
}

fn is_terminal(status: PairingSessionStatus) -> bool {
    matches!(status, PairingSessionStatus::Redeemed | PairingSessionStatus::Expired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crowdpm_common::models::device::{DeviceRecord, RegistryStatus};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid as UuidGen;

    struct InMemoryStore {
        by_device_code: Mutex<HashMap<String, PairingSession>>,
    }

    impl InMemoryStore {
        fn new() -> Self {
            Self { by_device_code: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl PairingSessionStore for InMemoryStore {
        async fn create(&self, session: PairingSession) -> CrowdpmResult<Option<PairingSession>> {
            let mut map = self.by_device_code.lock().unwrap();
            let collision = map.values().any(|s| s.user_code == session.user_code && !is_terminal(s.status));
            if collision || map.contains_key(&session.device_code) {
                return Ok(None);
            }
            map.insert(session.device_code.clone(), session.clone());
            Ok(Some(session))
        }

        async fn get_by_device_code(&self, device_code: &str) -> CrowdpmResult<Option<PairingSession>> {
            Ok(self.by_device_code.lock().unwrap().get(device_code).cloned())
        }

        async fn get_by_user_code(&self, user_code: &str) -> CrowdpmResult<Option<PairingSession>> {
            Ok(self.by_device_code.lock().unwrap().values().find(|s| s.user_code == user_code).cloned())
        }

        async fn update(
            &self,
            device_code: &str,
            mutator: Box<dyn FnOnce(&PairingSession) -> Option<PairingSession> + Send>,
        ) -> CrowdpmResult<Option<PairingSession>> {
            let mut map = self.by_device_code.lock().unwrap();
            let Some(current) = map.get(device_code).cloned() else { return Ok(None) };
            match mutator(&current) {
                Some(new_state) => {
                    map.insert(device_code.to_string(), new_state.clone());
                    Ok(Some(new_state))
                }
                None => Ok(Some(current)),
            }
        }

        async fn delete_expired(&self, _grace: Duration) -> CrowdpmResult<u64> {
            Ok(0)
        }
    }

    struct InMemoryRegistry {
        devices: Mutex<HashMap<String, DeviceRecord>>,
    }

    impl InMemoryRegistry {
        fn new() -> Self {
            Self { devices: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl DeviceRegistry for InMemoryRegistry {
        async fn register(&self, req: RegisterDeviceRequest) -> CrowdpmResult<DeviceRecord> {
            let record = DeviceRecord {
                device_id: format!("dev_{}", UuidGen::new_v4().simple()),
                acc_id: req.acc_id,
                pub_kl_thumbprint: req.pub_kl_thumbprint,
                pub_kl_jwk: req.pub_kl_jwk,
                model: req.model,
                version: req.version,
                fingerprint: req.fingerprint,
                created_at: Utc::now(),
                last_seen_at: None,
                registry_status: RegistryStatus::Active,
            };
            self.devices.lock().unwrap().insert(record.device_id.clone(), record.clone());
            Ok(record)
        }

        async fn get(&self, device_id: &str) -> CrowdpmResult<Option<DeviceRecord>> {
            Ok(self.devices.lock().unwrap().get(device_id).cloned())
        }

        async fn revoke(&self, _device_id: &str, _actor_id: &str, _reason: &str) -> CrowdpmResult<()> {
            Ok(())
        }

        async fn suspend(&self, _device_id: &str) -> CrowdpmResult<()> {
            Ok(())
        }

        async fn resume(&self, _device_id: &str) -> CrowdpmResult<()> {
            Ok(())
        }

        async fn touch_last_seen(&self, _device_id: &str) -> CrowdpmResult<()> {
            Ok(())
        }
    }

    struct NoLimitRateLimiter;

    #[async_trait]
    impl RateLimiter for NoLimitRateLimiter {
        async fn consume(&self, _key: &str, _capacity: u64, _window: Duration) -> CrowdpmResult<bool> {
            Ok(true)
        }
    }

    struct InMemoryReplay {
        seen: Mutex<std::collections::HashSet<String>>,
    }

    impl InMemoryReplay {
        fn new() -> Self {
            Self { seen: Mutex::new(Default::default()) }
        }
    }

    #[async_trait]
    impl ReplayStore for InMemoryReplay {
        async fn check_and_insert(&self, key: &str, _ttl: Duration) -> CrowdpmResult<bool> {
            Ok(self.seen.lock().unwrap().insert(key.to_string()))
        }
    }

    fn build_coordinator() -> PairingCoordinator {
        let replay: Arc<dyn ReplayStore> = Arc::new(InMemoryReplay::new());
        let dpop = Arc::new(DpopVerifier::new(replay.clone(), crowdpm_security::dpop::DpopConfig::default()));
        let signing_key = Arc::new(crowdpm_security::keys::SigningKeyPair::generate());
        let token_issuer = Arc::new(TokenIssuer::new(signing_key, Duration::from_secs(60), Duration::from_secs(600)));
        PairingCoordinator::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryRegistry::new()),
            Arc::new(NoLimitRateLimiter),
            replay,
            dpop,
            token_issuer,
            PairingConfig {
                session_ttl: Duration::from_secs(600),
                default_poll_interval: Duration::from_secs(5),
                verification_uri: "https://crowdpm.example/activate".into(),
            },
        )
    }

    fn device_keypair() -> (crowdpm_security::keys::SigningKeyPair, String) {
        let kp = crowdpm_security::keys::SigningKeyPair::generate();
        let b64 = URL_SAFE_NO_PAD.encode(kp.verifying_key().as_bytes());
        (kp, b64)
    }

    fn dpop_proof(kp: &crowdpm_security::keys::SigningKeyPair, htm: &str, htu: &str, iat: i64, jti: &str) -> String {
        let jwk = Ed25519Jwk::from_verifying_key(&kp.verifying_key());
        let header = serde_json::json!({ "alg": "EdDSA", "typ": "dpop+jwt", "jwk": jwk });
        let payload = serde_json::json!({ "htm": htm, "htu": htu, "iat": iat, "jti": jti });
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
        let sig = kp.sign_bytes(format!("{header_b64}.{payload_b64}").as_bytes());
        format!("{header_b64}.{payload_b64}.{sig}")
    }

    #[tokio::test]
    async fn start_then_poll_is_authorization_pending() {
        let coordinator = build_coordinator();
        let (kp, pub_ke_b64) = device_keypair();
        let start = coordinator
            .start(StartRequest {
                pub_ke_b64,
                model: "sensor-x1".into(),
                version: "1.0.0".into(),
                nonce: None,
                client_ip: Some("203.0.113.9".parse().unwrap()),
                asn_hint: None,
            })
            .await
            .unwrap();

        let htu = "https://api.crowdpm.example/device/token";
        let proof = dpop_proof(&kp, "POST", htu, Utc::now().timestamp(), "jti-poll-1");
        let err = coordinator.poll(&start.device_code, &proof, htu).await.unwrap_err();
        assert!(matches!(err, CrowdpmError::AuthorizationPending));
    }

    #[tokio::test]
    async fn approve_then_poll_mints_registration_token() {
        let coordinator = build_coordinator();
        let (kp, pub_ke_b64) = device_keypair();
        let start = coordinator
            .start(StartRequest {
                pub_ke_b64,
                model: "sensor-x1".into(),
                version: "1.0.0".into(),
                nonce: None,
                client_ip: None,
                asn_hint: None,
            })
            .await
            .unwrap();

        coordinator.approve(&start.user_code, "acc_42").await.unwrap();

        let htu = "https://api.crowdpm.example/device/token";
        let proof = dpop_proof(&kp, "POST", htu, Utc::now().timestamp(), "jti-poll-2");
        let outcome = coordinator.poll(&start.device_code, &proof, htu).await.unwrap();
        match outcome {
            PollOutcome::RegistrationToken { token, .. } => assert!(!token.is_empty()),
        }
    }

    #[tokio::test]
    async fn rapid_repeated_poll_slows_down() {
        let coordinator = build_coordinator();
        let (kp, pub_ke_b64) = device_keypair();
        let start = coordinator
            .start(StartRequest {
                pub_ke_b64,
                model: "sensor-x1".into(),
                version: "1.0.0".into(),
                nonce: None,
                client_ip: None,
                asn_hint: None,
            })
            .await
            .unwrap();

        let htu = "https://api.crowdpm.example/device/token";
        let proof1 = dpop_proof(&kp, "POST", htu, Utc::now().timestamp(), "jti-a");
        coordinator.poll(&start.device_code, &proof1, htu).await.unwrap_err(); // pending

        let proof2 = dpop_proof(&kp, "POST", htu, Utc::now().timestamp(), "jti-b");
        let err = coordinator.poll(&start.device_code, &proof2, htu).await.unwrap_err();
        assert!(matches!(err, CrowdpmError::SlowDown { .. }));
    }

    #[tokio::test]
    async fn full_happy_path_redeems_a_device() {
        let coordinator = build_coordinator();
        let (pairing_kp, pub_ke_b64) = device_keypair();
        let start = coordinator
            .start(StartRequest {
                pub_ke_b64,
                model: "sensor-x1".into(),
                version: "1.0.0".into(),
                nonce: None,
                client_ip: None,
                asn_hint: None,
            })
            .await
            .unwrap();

        coordinator.approve(&start.user_code, "acc_42").await.unwrap();

        let token_htu = "https://api.crowdpm.example/device/token";
        let registration_token = loop {
            let proof = dpop_proof(&pairing_kp, "POST", token_htu, Utc::now().timestamp(), &UuidGen::new_v4().to_string());
            match coordinator.poll(&start.device_code, &proof, token_htu).await {
                Ok(PollOutcome::RegistrationToken { token, .. }) => break token,
                Err(CrowdpmError::SlowDown { .. }) => continue,
                Err(e) => panic!("unexpected poll error: {e:?}"),
            }
        };

        let long_term_kp = crowdpm_security::keys::SigningKeyPair::generate();
        let pub_kl_jwk = Ed25519Jwk::from_verifying_key(&long_term_kp.verifying_key());
        let register_htu = "https://api.crowdpm.example/device/register";
        // Redemption must be proven with the ephemeral pairing key, not the
        // freshly-minted long-term key — see the wrong-key test below.
        let redeem_proof = dpop_proof(&pairing_kp, "POST", register_htu, Utc::now().timestamp(), "jti-redeem-1");

        let redeemed = coordinator
            .redeem(RedeemRequest {
                registration_token,
                dpop_proof: redeem_proof,
                request_url: register_htu.to_string(),
                pub_kl_jwk,
            })
            .await
            .unwrap();

        assert!(redeemed.device_id.starts_with("dev_"));
    }

    #[tokio::test]
    async fn redeem_rejects_proof_signed_by_long_term_key() {
        let coordinator = build_coordinator();
        let (pairing_kp, pub_ke_b64) = device_keypair();
        let start = coordinator
            .start(StartRequest {
                pub_ke_b64,
                model: "sensor-x1".into(),
                version: "1.0.0".into(),
                nonce: None,
                client_ip: None,
                asn_hint: None,
            })
            .await
            .unwrap();

        coordinator.approve(&start.user_code, "acc_42").await.unwrap();

        let token_htu = "https://api.crowdpm.example/device/token";
        let registration_token = loop {
            let proof = dpop_proof(&pairing_kp, "POST", token_htu, Utc::now().timestamp(), &UuidGen::new_v4().to_string());
            match coordinator.poll(&start.device_code, &proof, token_htu).await {
                Ok(PollOutcome::RegistrationToken { token, .. }) => break token,
                Err(CrowdpmError::SlowDown { .. }) => continue,
                Err(e) => panic!("unexpected poll error: {e:?}"),
            }
        };

        let long_term_kp = crowdpm_security::keys::SigningKeyPair::generate();
        let pub_kl_jwk = Ed25519Jwk::from_verifying_key(&long_term_kp.verifying_key());
        let register_htu = "https://api.crowdpm.example/device/register";
        // Signed by the long-term key instead of the pairing key — must be
        // rejected even though the registration token itself is valid.
        let redeem_proof = dpop_proof(&long_term_kp, "POST", register_htu, Utc::now().timestamp(), "jti-redeem-wrong-key");

        let err = coordinator
            .redeem(RedeemRequest {
                registration_token,
                dpop_proof: redeem_proof,
                request_url: register_htu.to_string(),
                pub_kl_jwk,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CrowdpmError::InvalidBinding));
    }

    #[tokio::test]
    async fn approve_rejects_unknown_user_code() {
        let coordinator = build_coordinator();
        let err = coordinator.approve("ZZZZZ-ZZZZZ-2", "acc_1").await.unwrap_err();
        assert!(matches!(err, CrowdpmError::InvalidRequest(_)));
    }
}
