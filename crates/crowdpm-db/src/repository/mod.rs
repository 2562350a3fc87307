//! Repository layer — port-trait implementations backed by Postgres/Redis.

pub mod account_policy;
pub mod batches;
pub mod devices;
pub mod event_bus;
pub mod pairing_sessions;
pub mod rate_limiter;
pub mod replay_store;
