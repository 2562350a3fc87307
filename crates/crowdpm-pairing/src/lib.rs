//! # crowdpm-pairing
//!
//! The C2 pairing coordinator: a device-authorization-grant state machine
//! taking an unauthenticated device from `start` through a human's
//! out-of-band `approve` to a `redeem`d, registered `device_id`. Storage,
//! rate limiting, and cryptographic verification are all injected via
//! `crowdpm-common`'s port traits and `crowdpm-security`'s DPoP/token
//! primitives — this crate holds only the state-machine rules.

pub mod coordinator;
pub mod net;

pub use coordinator::{
    PairingConfig, PairingCoordinator, PollOutcome, RedeemRequest, RedeemResponse, StartRequest,
    StartResponse,
};
