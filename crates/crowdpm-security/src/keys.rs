//! Ed25519 key pair handling.
//!
//! Used both for the service's own token-signing key and, read-only, for
//! validating device public keys embedded in pairing requests and DPoP
//! proofs. This module never holds a device's private key — only the
//! verification side of device keys is used server-side.

use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::SecurityError;
use crate::signatures::canonical_json;

/// An Ed25519 signing key pair.
pub struct SigningKeyPair {
    /// Key ID in the format `ed25519:<10-char-hex>`.
    pub key_id: String,
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a brand-new random Ed25519 key pair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let key_id = derive_key_id(signing_key.verifying_key().as_bytes());
        Self { key_id, signing_key }
    }

    /// Reconstruct a `SigningKeyPair` from raw 32-byte seed bytes.
    pub fn from_seed(seed: &[u8]) -> Result<Self, SecurityError> {
        let bytes: [u8; 32] = seed
            .try_into()
            .map_err(|_| SecurityError::KeyLoad("seed must be exactly 32 bytes".into()))?;
        let signing_key = SigningKey::from_bytes(&bytes);
        let key_id = derive_key_id(signing_key.verifying_key().as_bytes());
        Ok(Self { key_id, signing_key })
    }

    /// Return the 32-byte seed (private key scalar) for persistence.
    pub fn seed_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Return the PKCS#8 DER encoding of the private key, for use with
    /// `jsonwebtoken::EncodingKey::from_ed_der`.
    pub fn to_pkcs8_der(&self) -> Vec<u8> {
        use ed25519_dalek::pkcs8::EncodePrivateKey;
        self.signing_key
            .to_pkcs8_der()
            .expect("ed25519 key encodes to pkcs8 der")
            .as_bytes()
            .to_vec()
    }

    /// Return the SPKI DER encoding of the public key, for use with
    /// `jsonwebtoken::DecodingKey::from_ed_der`.
    pub fn to_public_der(&self) -> Vec<u8> {
        use ed25519_dalek::pkcs8::EncodePublicKey;
        self.signing_key
            .verifying_key()
            .to_public_key_der()
            .expect("ed25519 key encodes to spki der")
            .as_bytes()
            .to_vec()
    }

    /// Return the public verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Return the public key as a base64url-encoded string.
    pub fn public_key_base64(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Sign arbitrary bytes and return the base64url-encoded signature.
    pub fn sign_bytes(&self, bytes: &[u8]) -> String {
        let sig = self.signing_key.sign(bytes);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(sig.to_bytes())
    }
}

/// A minimal Ed25519 JWK representation — the subset `{kty, crv, x}` that
/// DPoP proofs and pairing key submissions embed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ed25519Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
}

impl Ed25519Jwk {
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(key.as_bytes()),
        }
    }

    /// Decode the embedded public key bytes.
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, SecurityError> {
        if self.kty != "OKP" || self.crv != "Ed25519" {
            return Err(SecurityError::MalformedProof(
                "jwk must be kty=OKP crv=Ed25519".into(),
            ));
        }
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&self.x)
            .map_err(|_| SecurityError::MalformedProof("jwk.x is not valid base64url".into()))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SecurityError::MalformedProof("jwk.x must be 32 bytes".into()))?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| SecurityError::InvalidSignature)
    }

    /// Compute the RFC 7638 JWK thumbprint: base64url(SHA-256(canonical JSON
    /// of the required members in lexicographic order)).
    pub fn thumbprint(&self) -> Result<String, SecurityError> {
        use sha2::{Digest, Sha256};
        // Required-members object per RFC 7638 §3.2 for an OKP key: crv, kty, x.
        let value = serde_json::json!({
            "crv": self.crv,
            "kty": self.kty,
            "x": self.x,
        });
        let canonical = canonical_json(&value)?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest))
    }
}

/// Derive a stable key ID from raw public key bytes (first 6 bytes, hex).
fn derive_key_id(pubkey_bytes: &[u8]) -> String {
    let fingerprint = hex::encode(&pubkey_bytes[..6]);
    format!("ed25519:{}", fingerprint)
}

/// Verify an Ed25519 signature.
///
/// * `verifying_key` — the public key to verify against
/// * `sig_base64`    — base64url-encoded 64-byte signature
/// * `message`       — original signed bytes
pub fn verify_signature(
    verifying_key: &VerifyingKey,
    sig_base64: &str,
    message: &[u8],
) -> Result<(), SecurityError> {
    use ed25519_dalek::Verifier;

    let sig_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(sig_base64)
        .map_err(|_| SecurityError::InvalidSignature)?;

    let signature = ed25519_dalek::Signature::from_bytes(
        sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| SecurityError::InvalidSignature)?,
    );

    verifying_key
        .verify(message, &signature)
        .map_err(|_| SecurityError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_sign_verify() {
        let kp = SigningKeyPair::generate();
        let msg = b"hello crowdpm";
        let sig = kp.sign_bytes(msg);
        verify_signature(&kp.verifying_key(), &sig, msg).expect("signature should verify");
    }

    #[test]
    fn from_seed_is_stable() {
        let kp1 = SigningKeyPair::generate();
        let seed = kp1.seed_bytes();
        let kp2 = SigningKeyPair::from_seed(&seed).unwrap();
        assert_eq!(kp1.key_id, kp2.key_id);
        assert_eq!(kp1.public_key_base64(), kp2.public_key_base64());
    }

    #[test]
    fn jwk_thumbprint_is_deterministic() {
        let kp = SigningKeyPair::generate();
        let jwk = Ed25519Jwk::from_verifying_key(&kp.verifying_key());
        let t1 = jwk.thumbprint().unwrap();
        let t2 = jwk.thumbprint().unwrap();
        assert_eq!(t1, t2);
    }

    #[test]
    fn jwk_round_trips_through_verifying_key() {
        let kp = SigningKeyPair::generate();
        let jwk = Ed25519Jwk::from_verifying_key(&kp.verifying_key());
        let recovered = jwk.to_verifying_key().unwrap();
        assert_eq!(recovered, kp.verifying_key());
    }
}
