//! `GET /v1/response/{trace_id}` — the idempotent poll used as a safety
//! net when SSE is truncated by an intermediary.
//!
//! Contract: `{status: pending | complete | not_found, response?}`. Every
//! terminal trace reads as `complete`; errored and cancelled turns carry
//! their human-readable notice as the response.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn get_response(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> impl IntoResponse {
    match state.hub.get_response(&trace_id) {
        None => Json(serde_json::json!({ "status": "not_found" })),
        Some((status, response)) => {
            if status.is_terminal() {
                Json(serde_json::json!({
                    "status": "complete",
                    "response": response,
                }))
            } else {
                Json(serde_json::json!({ "status": "pending" }))
            }
        }
    }
}
