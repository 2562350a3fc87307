//! # crowdpm-security
//!
//! Cryptographic primitives shared by the pairing coordinator and the ingest
//! gateway: canonical JSON + Ed25519 signing (`keys.rs`), the service's own
//! signing key lifecycle (`signing_key.rs`), DPoP proof verification
//! (`dpop.rs`), and bearer-token issuance/verification (`tokens.rs`).
//!
//! ## Key concepts
//!
//! - **Signing keys** (`keys.rs`): a generic Ed25519 key-pair wrapper used
//!   both for a device's own keys (validated, never held server-side) and
//!   for the server's token-signing key.
//! - **Canonical JSON** (`signatures.rs`): sorted-key, whitespace-free JSON
//!   serialisation, used both to compute JWK thumbprints and to verify DPoP
//!   proof signatures.
//! - **Signing key manager** (`signing_key.rs`): loads the server's Ed25519
//!   token-signing key from configuration, falling back to a DB-backed
//!   load-or-generate cycle.
//! - **DPoP verifier** (`dpop.rs`): validates proof-of-possession JWTs per
//!   the eight-step ordered rule set.
//! - **Token issuer** (`tokens.rs`): mints and verifies registration and
//!   access tokens bound to a device's key via `cnf.jkt`.

pub mod dpop;
pub mod error;
pub mod keys;
pub mod signatures;
pub mod signing_key;
pub mod tokens;

pub use error::SecurityError;
pub use keys::SigningKeyPair;
pub use signing_key::SigningKeyManager;
