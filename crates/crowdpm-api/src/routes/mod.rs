//! HTTP route modules, one per resource group. Each exposes a `router()`
//! returning a sub-`Router<Arc<AppState>>`, merged together in
//! [`crate::build_router`].

pub mod activation;
pub mod device;
pub mod health;
pub mod ingest;
