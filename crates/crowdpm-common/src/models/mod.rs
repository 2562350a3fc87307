//! Domain models shared across the pairing, security, ingest, and API
//! crates.

pub mod device;
pub mod ingest;
pub mod pairing;

pub use device::DeviceRecord;
pub use ingest::IngestBatchRecord;
pub use pairing::PairingSession;
