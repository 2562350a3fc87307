//! Request-shape helpers shared across route handlers: DPoP header
//! extraction and reconstructing the absolute request URL a DPoP proof's
//! `htu` claim must match.

use axum::http::{HeaderMap, Uri};

use crowdpm_common::error::CrowdpmError;

pub const DPOP_HEADER: &str = "dpop";

/// Pull the `DPoP` header out of an inbound request. Every DPoP-protected
/// endpoint requires exactly one.
pub fn extract_dpop_header(headers: &HeaderMap) -> Result<String, CrowdpmError> {
    headers
        .get(DPOP_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| CrowdpmError::InvalidProof("missing DPoP header".into()))
}

/// Reconstruct the absolute URL the device signed over in its proof's
/// `htu` claim. Behind a reverse proxy the scheme is always https; the
/// host comes from the forwarded `Host` header the proxy preserves.
pub fn request_url(headers: &HeaderMap, uri: &Uri) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or(uri.path());
    format!("https://{host}{path_and_query}")
}

/// Best-effort client IP: the first hop of `X-Forwarded-For`, falling back
/// to `None` when the proxy doesn't set one (e.g. in local development).
pub fn client_ip(headers: &HeaderMap) -> Option<std::net::IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}

/// Coarse ASN hint, as set by whatever edge network terminates TLS for us.
pub fn asn_hint(headers: &HeaderMap) -> Option<String> {
    headers.get("x-asn-hint").and_then(|v| v.to_str().ok()).map(str::to_string)
}
