//! `/v1/device-activation` — the human-facing side of the pairing flow: a
//! page backed by `user_code` a person reads off a device's screen, and the
//! approval action that moves the session from `pending` to `authorized`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crowdpm_common::error::CrowdpmResult;
use crowdpm_common::models::pairing::PairingSessionView;

use crate::human_session::HumanSession;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/device-activation", get(view_session))
        .route("/v1/device-activation/authorize", post(authorize))
}

#[derive(Debug, Deserialize)]
struct ActivationQuery {
    user_code: String,
}

async fn view_session(
    State(state): State<Arc<AppState>>,
    _session: HumanSession,
    Query(query): Query<ActivationQuery>,
) -> CrowdpmResult<Json<PairingSessionView>> {
    let view = state.pairing.get_session_view(&query.user_code).await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
struct AuthorizeBody {
    user_code: String,
}

async fn authorize(
    State(state): State<Arc<AppState>>,
    session: HumanSession,
    Json(body): Json<AuthorizeBody>,
) -> CrowdpmResult<Json<PairingSessionView>> {
    let view = state.pairing.approve(&body.user_code, &session.acc_id).await?;
    Ok(Json(view))
}
