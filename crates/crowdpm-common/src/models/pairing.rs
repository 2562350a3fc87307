//! Pairing session state — one row per device-authorization-grant attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a [`PairingSession`]. Terminal states are `Expired`
/// and `Redeemed`; no transition out of a terminal state is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "pairing_session_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PairingSessionStatus {
    Pending,
    Authorized,
    Redeemed,
    Expired,
}

/// One pairing attempt, keyed by `device_code` with a secondary lookup by
/// `user_code`. Owned exclusively by the pairing session store and mutated
/// only through the pairing coordinator's transactional operations.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PairingSession {
    /// Opaque 128-bit identifier, hex-encoded. Presented by the device when
    /// polling. Unique forever, even after expiry.
    pub device_code: String,
    /// Human-typable identifier: 10 alphabet characters + 1 checksum
    /// character, dash-grouped for display. Unique among non-terminal
    /// sessions.
    pub user_code: String,
    /// SHA-256 JWK thumbprint of the device's ephemeral pairing key. Binds
    /// every proof presented while this session is live.
    pub pub_ke_thumbprint: String,
    /// The ephemeral pairing public key, stored for re-derivation/audit.
    pub pub_ke_jwk: serde_json::Value,
    /// First 8 hex characters of SHA-256(raw pub_ke bytes), shown to the
    /// approving human for out-of-band comparison.
    pub fingerprint: String,
    pub model: String,
    pub version: String,
    pub nonce: Option<String>,
    /// `/24`-masked IPv4 or `/64`-masked IPv6 address of the first contact.
    pub requester_ip_coarsened: Option<String>,
    pub requester_asn_hint: Option<String>,
    pub status: PairingSessionStatus,
    /// Authenticated human account that authorized the session. Null until
    /// approval.
    pub acc_id: Option<String>,
    /// Enforced polling cadence, in seconds.
    pub poll_interval_secs: i32,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// The currently-live registration token's `jti`, if one has been
    /// minted for this session.
    pub registration_token_jti: Option<Uuid>,
    pub registration_token_expires_at: Option<DateTime<Utc>>,
}

/// Disposition returned by a pairing session store `update` mutator: either
/// the new state is accepted, or the caller's precondition failed and the
/// stored state is returned unchanged.
pub enum MutationOutcome<T> {
    Ok(T),
    Reject(T),
}

/// Publicly viewable projection of a [`PairingSession`], returned by the
/// device-activation human-facing endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PairingSessionView {
    pub model: String,
    pub version: String,
    pub fingerprint: String,
    pub requester_ip_coarsened: Option<String>,
    pub requester_asn_hint: Option<String>,
    pub status: PairingSessionStatus,
    pub poll_interval_secs: i32,
    pub expires_at: DateTime<Utc>,
}

impl From<&PairingSession> for PairingSessionView {
    fn from(s: &PairingSession) -> Self {
        Self {
            model: s.model.clone(),
            version: s.version.clone(),
            fingerprint: s.fingerprint.clone(),
            requester_ip_coarsened: s.requester_ip_coarsened.clone(),
            requester_asn_hint: s.requester_asn_hint.clone(),
            status: s.status,
            poll_interval_secs: s.poll_interval_secs,
            expires_at: s.expires_at,
        }
    }
}
