//! # crowdpm-ingest
//!
//! The C6 ingest gateway: the single `/ingestGateway` admission path that
//! authenticates a device's access token and DPoP proof, seals a
//! measurement batch into blob storage, records it, and announces it to
//! downstream processing. Like `crowdpm-pairing`, all storage and crypto
//! dependencies are injected via ports and `crowdpm-security` primitives.

pub mod gateway;

pub use gateway::{GatewayConfig, IngestGateway, IngestRequest};
