//! Intervention endpoints — the human side of blocker handoff.
//!
//! - `GET  /interventions/pending`      — list for UI polling
//! - `POST /interventions/:id/resolve`  — `{resolved: bool}`; false = skip

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use pandora_domain::research::InterventionResolution;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    #[serde(default)]
    pub profile: Option<String>,
}

pub async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> impl IntoResponse {
    let interventions = state
        .interventions
        .list_pending(query.profile.as_deref());
    Json(serde_json::json!({
        "interventions": interventions,
        "count": interventions.len(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// `true` = the human cleared the blocker; `false` = skip the source.
    pub resolved: bool,
}

pub async fn resolve(
    State(state): State<AppState>,
    Path(intervention_id): Path<String>,
    Json(body): Json<ResolveRequest>,
) -> impl IntoResponse {
    let resolution = if body.resolved {
        InterventionResolution::Ok
    } else {
        InterventionResolution::Skipped
    };
    let ok = state.interventions.resolve(&intervention_id, resolution);
    Json(serde_json::json!({ "ok": ok }))
}
