//! Input validation utilities.
//!
//! Centralized validation helpers used across API routes. Per-field
//! constraints are expressed with `validator::Validate` derives on the DTOs
//! themselves (see `models::ingest::IngestPoint`); cross-field checks that
//! the derive macro can't express live here as plain functions.

use validator::Validate;

use crate::error::CrowdpmError;

/// Validate a request body, returning `CrowdpmError::InvalidPayload` on
/// failure.
pub fn validate_request<T: Validate>(body: &T) -> Result<(), CrowdpmError> {
    body.validate()
        .map_err(|e| CrowdpmError::InvalidPayload(format_validation_errors(e)))
}

fn format_validation_errors(errors: validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("invalid value for '{field}'"))
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}
