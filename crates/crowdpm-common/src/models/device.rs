//! Registered device records — owned exclusively by the device registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a registered device. Revocation is monotonic: there
/// is no transition back out of `Revoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "device_registry_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RegistryStatus {
    Active,
    Suspended,
    Revoked,
}

impl RegistryStatus {
    /// `true` iff the device is eligible for token issuance and ingest.
    pub fn is_admissible(self) -> bool {
        matches!(self, RegistryStatus::Active)
    }
}

/// One registered device, identified by its server-issued `device_id`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceRecord {
    pub device_id: String,
    pub acc_id: String,
    /// SHA-256 JWK thumbprint of the device's long-term key. Every
    /// ingest-facing proof must match this. Unique across active devices.
    pub pub_kl_thumbprint: String,
    pub pub_kl_jwk: serde_json::Value,
    pub model: String,
    pub version: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub registry_status: RegistryStatus,
}

#[derive(Debug, Clone)]
pub struct RegisterDeviceRequest {
    pub acc_id: String,
    pub model: String,
    pub version: String,
    pub pub_kl_jwk: serde_json::Value,
    pub pub_kl_thumbprint: String,
    pub ke_thumbprint: String,
    pub pairing_device_code: String,
    pub fingerprint: String,
}
