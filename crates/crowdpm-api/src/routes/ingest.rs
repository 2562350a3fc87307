//! `/ingestGateway` — the C6 measurement batch admission endpoint.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::post;
use axum::{Json, Router};

use crowdpm_common::error::CrowdpmResult;
use crowdpm_common::models::ingest::IngestAcceptedResponse;
use crowdpm_ingest::gateway::IngestRequest;

use crate::middleware::{extract_dpop_header, request_url};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ingestGateway", post(ingest_gateway))
}

async fn ingest_gateway(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> CrowdpmResult<(StatusCode, Json<IngestAcceptedResponse>)> {
    let dpop_header = extract_dpop_header(&headers)?;
    let htu = request_url(&headers, &uri);
    let authorization_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let response = state
        .ingest
        .ingest(IngestRequest {
            raw_body: &body,
            authorization_header,
            dpop_header: &dpop_header,
            request_url: &htu,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}
