//! C6 Ingest Gateway — the single `/ingestGateway` admission pipeline.
//!
//! Admission is at-least-once on the publish step: once the blob is written
//! and the batch record created, a publish failure is surfaced as an error
//! but the blob and record are left in place for an out-of-band reconciler
//! to pick up. This module never retries a publish itself.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use sha2::{Digest, Sha256};
use validator::Validate;

use crowdpm_common::error::{CrowdpmError, CrowdpmResult};
use crowdpm_common::ids::generate_batch_id;
use crowdpm_common::models::ingest::{
    IngestAcceptedResponse, IngestBatchRecord, IngestBatchRequest, IngestEvent, Visibility,
};
use crowdpm_common::ports::{BatchRecordStore, BlobStore, DeviceRegistry, EventBus, VisibilityPolicy};

use crowdpm_security::dpop::{DpopVerifier, VerifyParams};
use crowdpm_security::signatures::canonical_json;
use crowdpm_security::tokens::TokenIssuer;

/// One inbound `/ingestGateway` call, as lifted off the wire by the HTTP
/// layer. Borrowed for the duration of the call — the gateway doesn't own
/// the request body.
pub struct IngestRequest<'a> {
    pub raw_body: &'a [u8],
    pub authorization_header: Option<&'a str>,
    pub dpop_header: &'a str,
    pub request_url: &'a str,
}

pub struct GatewayConfig {
    pub events_topic: String,
    pub max_points_per_batch: u32,
}

pub struct IngestGateway {
    token_issuer: Arc<TokenIssuer>,
    dpop: Arc<DpopVerifier>,
    registry: Arc<dyn DeviceRegistry>,
    blob_store: Arc<dyn BlobStore>,
    batch_store: Arc<dyn BatchRecordStore>,
    event_bus: Arc<dyn EventBus>,
    visibility_policy: Arc<dyn VisibilityPolicy>,
    config: GatewayConfig,
}

impl IngestGateway {
    pub fn new(
        token_issuer: Arc<TokenIssuer>,
        dpop: Arc<DpopVerifier>,
        registry: Arc<dyn DeviceRegistry>,
        blob_store: Arc<dyn BlobStore>,
        batch_store: Arc<dyn BatchRecordStore>,
        event_bus: Arc<dyn EventBus>,
        visibility_policy: Arc<dyn VisibilityPolicy>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            token_issuer,
            dpop,
            registry,
            blob_store,
            batch_store,
            event_bus,
            visibility_policy,
            config,
        }
    }

    pub async fn ingest(&self, req: IngestRequest<'_>) -> CrowdpmResult<IngestAcceptedResponse> {
        // 1. Access token.
        let bearer = req
            .authorization_header
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(CrowdpmError::InvalidToken)?;
        let claims = self.token_issuer.verify_access_token(bearer)?;

        // 2. DPoP proof, bound to the access token via `ath`.
        let ath = URL_SAFE_NO_PAD.encode(Sha256::digest(bearer.as_bytes()));
        let now = Utc::now();
        self.dpop
            .verify(
                req.dpop_header,
                VerifyParams {
                    method: "POST",
                    htu: req.request_url,
                    expected_thumbprint: Some(&claims.cnf.jkt),
                    required_ath: Some(&ath),
                },
                now,
            )
            .await?;

        // 3. Device must still be active.
        let device = self
            .registry
            .get(&claims.device_id)
            .await?
            .ok_or(CrowdpmError::DeviceForbidden)?;
        if !device.registry_status.is_admissible() {
            return Err(CrowdpmError::DeviceForbidden);
        }

        // 4. Parse and validate the batch.
        let batch: IngestBatchRequest = serde_json::from_slice(req.raw_body)
            .map_err(|e| CrowdpmError::InvalidPayload(format!("malformed ingest batch: {e}")))?;
        if batch.device_id != claims.device_id {
            return Err(CrowdpmError::DeviceMismatch);
        }
        if batch.points.is_empty() {
            return Err(CrowdpmError::InvalidPayload("batch must contain at least one point".into()));
        }
        if batch.points.len() as u32 > self.config.max_points_per_batch {
            return Err(CrowdpmError::InvalidPayload(format!(
                "batch exceeds the {}-point limit",
                self.config.max_points_per_batch
            )));
        }
        for point in &batch.points {
            point
                .validate()
                .map_err(|e| CrowdpmError::InvalidPayload(e.to_string()))?;
            if point.device_id != claims.device_id {
                return Err(CrowdpmError::DeviceMismatch);
            }
        }

        // 5. Canonicalize and mint storage coordinates.
        let batch_value = serde_json::to_value(&batch).map_err(|e| CrowdpmError::Internal(anyhow::anyhow!(e)))?;
        let canonical = canonical_json(&batch_value)?;
        let batch_id = generate_batch_id();
        let storage_path = format!("ingest/{}/{}.json", claims.device_id, batch_id);

        // 6. Seal the raw blob.
        self.blob_store
            .put_object(&storage_path, "application/json", canonical.as_bytes())
            .await?;

        // 7. Resolve visibility.
        let visibility = match batch.visibility {
            Some(Visibility::Public) => {
                if self.visibility_policy.allows_public(&claims.acc_id).await? {
                    Visibility::Public
                } else {
                    self.visibility_policy.default_visibility(&claims.acc_id).await?
                }
            }
            Some(Visibility::Private) => Visibility::Private,
            None => self.visibility_policy.default_visibility(&claims.acc_id).await?,
        };

        // 8. Record the pending batch.
        self.batch_store
            .create(IngestBatchRecord {
                batch_id,
                device_id: claims.device_id.clone(),
                storage_path: storage_path.clone(),
                count: batch.points.len() as i32,
                processed_at: None,
                visibility,
                created_at: now,
            })
            .await?;

        // 9. Publish downstream.
        self.event_bus
            .publish(
                &self.config.events_topic,
                &IngestEvent {
                    device_id: claims.device_id.clone(),
                    batch_id,
                    path: storage_path.clone(),
                    visibility,
                },
            )
            .await?;

        // 10. Best-effort liveness tracking; never fails the request.
        if let Err(e) = self.registry.touch_last_seen(&claims.device_id).await {
            tracing::warn!(device_id = %claims.device_id, error = %e, "touch_last_seen failed");
        }

        Ok(IngestAcceptedResponse { batch_id, storage_path, visibility })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crowdpm_common::models::device::{DeviceRecord, RegisterDeviceRequest, RegistryStatus};
    use crowdpm_security::keys::{Ed25519Jwk, SigningKeyPair};
    use crowdpm_security::tokens::IssueAccessTokenRequest;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    struct FixedRegistry {
        device: DeviceRecord,
    }

    #[async_trait]
    impl DeviceRegistry for FixedRegistry {
        async fn register(&self, _req: RegisterDeviceRequest) -> CrowdpmResult<DeviceRecord> {
            unimplemented!()
        }
        async fn get(&self, device_id: &str) -> CrowdpmResult<Option<DeviceRecord>> {
            if device_id == self.device.device_id {
                Ok(Some(self.device.clone()))
            } else {
                Ok(None)
            }
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

    struct InMemoryBlobStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl BlobStore for InMemoryBlobStore {
        async fn put_object(&self, path: &str, _content_type: &str, bytes: &[u8]) -> CrowdpmResult<()> {
            self.objects.lock().unwrap().insert(path.to_string(), bytes.to_vec());
            Ok(())
        }
    }

    struct InMemoryBatchStore {
        records: Mutex<Vec<IngestBatchRecord>>,
    }

    #[async_trait]
    impl BatchRecordStore for InMemoryBatchStore {
        async fn create(&self, record: IngestBatchRecord) -> CrowdpmResult<IngestBatchRecord> {
            self.records.lock().unwrap().push(record.clone());
            Ok(record)
        }
    }

    struct InMemoryEventBus {
        published: Mutex<Vec<IngestEvent>>,
    }

    #[async_trait]
    impl EventBus for InMemoryEventBus {
        async fn publish(&self, _topic: &str, event: &IngestEvent) -> CrowdpmResult<()> {
            self.published.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FixedVisibilityPolicy {
        default: Visibility,
        allow_public: bool,
    }

    #[async_trait]
    impl VisibilityPolicy for FixedVisibilityPolicy {
        async fn default_visibility(&self, _acc_id: &str) -> CrowdpmResult<Visibility> {
            Ok(self.default)
        }
        async fn allows_public(&self, _acc_id: &str) -> CrowdpmResult<bool> {
            Ok(self.allow_public)
        }
    }

    struct InMemoryReplay {
        seen: Mutex<std::collections::HashSet<String>>,
    }

    #[async_trait]
    impl crowdpm_common::ports::ReplayStore for InMemoryReplay {
        async fn check_and_insert(&self, key: &str, _ttl: Duration) -> CrowdpmResult<bool> {
            Ok(self.seen.lock().unwrap().insert(key.to_string()))
        }
    }

    fn sample_point(device_id: &str) -> serde_json::Value {
        serde_json::json!({
            "device_id": device_id,
            "pollutant": "pm25",
            "value": 12.3,
            "unit": "µg/m³",
            "lat": 37.77,
            "lon": -122.42,
            "timestamp": Utc::now().to_rfc3339(),
            "flags": 0,
        })
    }

    fn build_gateway_with(
        device: DeviceRecord,
        visibility_policy: FixedVisibilityPolicy,
    ) -> (IngestGateway, Arc<SigningKeyPair>, String) {
        let signing_key = Arc::new(SigningKeyPair::generate());
        let token_issuer = Arc::new(TokenIssuer::new(signing_key.clone(), Duration::from_secs(60), Duration::from_secs(600)));
        let replay: Arc<dyn crowdpm_common::ports::ReplayStore> = Arc::new(InMemoryReplay { seen: Mutex::new(Default::default()) });
        let dpop = Arc::new(DpopVerifier::new(replay, crowdpm_security::dpop::DpopConfig::default()));

        let device_key = SigningKeyPair::generate();
        let jkt = Ed25519Jwk::from_verifying_key(&device_key.verifying_key()).thumbprint().unwrap();
        let issued = token_issuer
            .issue_access_token(IssueAccessTokenRequest {
                device_id: device.device_id.clone(),
                acc_id: device.acc_id.clone(),
                confirmation_thumbprint: jkt,
                scope: None,
            })
            .unwrap();

        let gateway = IngestGateway::new(
            token_issuer,
            dpop,
            Arc::new(FixedRegistry { device }),
            Arc::new(InMemoryBlobStore { objects: Mutex::new(HashMap::new()) }),
            Arc::new(InMemoryBatchStore { records: Mutex::new(Vec::new()) }),
            Arc::new(InMemoryEventBus { published: Mutex::new(Vec::new()) }),
            Arc::new(visibility_policy),
            GatewayConfig { events_topic: "ingest.raw".into(), max_points_per_batch: 500 },
        );

        (gateway, Arc::new(device_key), issued.token)
    }

    fn dpop_proof_for_ingest(kp: &SigningKeyPair, htu: &str, access_token: &str) -> String {
        let jwk = Ed25519Jwk::from_verifying_key(&kp.verifying_key());
        let ath = URL_SAFE_NO_PAD.encode(Sha256::digest(access_token.as_bytes()));
        let header = serde_json::json!({ "alg": "EdDSA", "typ": "dpop+jwt", "jwk": jwk });
        let payload = serde_json::json!({
            "htm": "POST", "htu": htu, "iat": Utc::now().timestamp(), "jti": Uuid::new_v4().to_string(), "ath": ath,
        });
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
        let sig = kp.sign_bytes(format!("{header_b64}.{payload_b64}").as_bytes());
        format!("{header_b64}.{payload_b64}.{sig}")
    }

    fn active_device(device_id: &str, acc_id: &str) -> DeviceRecord {
        DeviceRecord {
            device_id: device_id.to_string(),
            acc_id: acc_id.to_string(),
            pub_kl_thumbprint: "thumb".into(),
            pub_kl_jwk: serde_json::json!({}),
            model: "sensor-x1".into(),
            version: "1.0.0".into(),
            fingerprint: "abcd1234".into(),
            created_at: Utc::now(),
            last_seen_at: None,
            registry_status: RegistryStatus::Active,
        }
    }

    #[tokio::test]
    async fn accepts_a_well_formed_batch() {
        let device = active_device("dev_1", "acc_1");
        let (gateway, device_key, token) = build_gateway_with(
            device,
            FixedVisibilityPolicy { default: Visibility::Private, allow_public: false },
        );

        let htu = "https://api.crowdpm.example/ingestGateway";
        let proof = dpop_proof_for_ingest(&device_key, htu, &token);
        let body = serde_json::json!({ "device_id": "dev_1", "points": [sample_point("dev_1")] });
        let raw = serde_json::to_vec(&body).unwrap();

        let resp = gateway
            .ingest(IngestRequest {
                raw_body: &raw,
                authorization_header: Some(&format!("Bearer {token}")),
                dpop_header: &proof,
                request_url: htu,
            })
            .await
            .unwrap();

        assert_eq!(resp.visibility, Visibility::Private);
        assert!(resp.storage_path.starts_with("ingest/dev_1/"));
    }

    #[tokio::test]
    async fn rejects_mismatched_device_id() {
        let device = active_device("dev_1", "acc_1");
        let (gateway, device_key, token) = build_gateway_with(
            device,
            FixedVisibilityPolicy { default: Visibility::Private, allow_public: false },
        );

        let htu = "https://api.crowdpm.example/ingestGateway";
        let proof = dpop_proof_for_ingest(&device_key, htu, &token);
        let body = serde_json::json!({ "device_id": "dev_1", "points": [sample_point("someone_else")] });
        let raw = serde_json::to_vec(&body).unwrap();

        let err = gateway
            .ingest(IngestRequest {
                raw_body: &raw,
                authorization_header: Some(&format!("Bearer {token}")),
                dpop_header: &proof,
                request_url: htu,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CrowdpmError::DeviceMismatch));
    }

    #[tokio::test]
    async fn rejects_suspended_device() {
        let mut device = active_device("dev_1", "acc_1");
        device.registry_status = RegistryStatus::Suspended;
        let (gateway, device_key, token) = build_gateway_with(
            device,
            FixedVisibilityPolicy { default: Visibility::Private, allow_public: false },
        );

        let htu = "https://api.crowdpm.example/ingestGateway";
        let proof = dpop_proof_for_ingest(&device_key, htu, &token);
        let body = serde_json::json!({ "device_id": "dev_1", "points": [sample_point("dev_1")] });
        let raw = serde_json::to_vec(&body).unwrap();

        let err = gateway
            .ingest(IngestRequest {
                raw_body: &raw,
                authorization_header: Some(&format!("Bearer {token}")),
                dpop_header: &proof,
                request_url: htu,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CrowdpmError::DeviceForbidden));
    }

    #[tokio::test]
    async fn downgrades_public_declaration_without_policy_grant() {
        let device = active_device("dev_1", "acc_1");
        let (gateway, device_key, token) = build_gateway_with(
            device,
            FixedVisibilityPolicy { default: Visibility::Private, allow_public: false },
        );

        let htu = "https://api.crowdpm.example/ingestGateway";
        let proof = dpop_proof_for_ingest(&device_key, htu, &token);
        let body = serde_json::json!({ "device_id": "dev_1", "visibility": "public", "points": [sample_point("dev_1")] });
        let raw = serde_json::to_vec(&body).unwrap();

        let resp = gateway
            .ingest(IngestRequest {
                raw_body: &raw,
                authorization_header: Some(&format!("Bearer {token}")),
                dpop_header: &proof,
                request_url: htu,
            })
            .await
            .unwrap();

        assert_eq!(resp.visibility, Visibility::Private);
    }
}
