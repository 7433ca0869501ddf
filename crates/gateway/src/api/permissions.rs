//! Permission-request endpoints — approving or denying out-of-allowlist
//! writes.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn list_pending(State(state): State<AppState>) -> impl IntoResponse {
    let permissions = state.permissions.list_pending();
    Json(serde_json::json!({
        "permissions": permissions,
        "count": permissions.len(),
    }))
}

pub async fn approve(
    State(state): State<AppState>,
    Path(permission_id): Path<String>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "ok": state.permissions.approve(&permission_id) }))
}

pub async fn deny(
    State(state): State<AppState>,
    Path(permission_id): Path<String>,
) -> impl IntoResponse {
    Json(serde_json::json!({ "ok": state.permissions.deny(&permission_id) }))
}
