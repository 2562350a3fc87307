//! # crowdpm-common
//!
//! Shared types, configuration, error handling, and port traits used across
//! all crowdpm crates. This is the foundation layer — no business logic,
//! just primitives and contracts.

pub mod config;
pub mod error;
pub mod ids;
pub mod models;
pub mod ports;
pub mod validation;
