//! Policy endpoints — explicit get/set of per-profile capability records.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use pandora_domain::policy::{Mode, PolicyRecord};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PolicyQuery {
    #[serde(default = "d_mode")]
    pub mode: Mode,
}

fn d_mode() -> Mode {
    Mode::Chat
}

pub async fn get_policy(
    State(state): State<AppState>,
    Path(profile): Path<String>,
    Query(query): Query<PolicyQuery>,
) -> impl IntoResponse {
    let record = state.policy.get_policy(&profile, query.mode);
    Json(serde_json::json!(record))
}

pub async fn set_policy(
    State(state): State<AppState>,
    Path(profile): Path<String>,
    Json(record): Json<PolicyRecord>,
) -> impl IntoResponse {
    state.policy.set_policy(&profile, record.clone());
    let effective = state.policy.get_policy(&profile, record.mode);
    Json(serde_json::json!({ "ok": true, "policy": effective }))
}
