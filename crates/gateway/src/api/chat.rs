//! `POST /v1/chat/completions` — turn intake.
//!
//! OpenAI-compatible request/response with an added `trace_id`. The reply
//! is synchronous when synthesis lands before the soft deadline
//! (request-configurable, default from config) and asynchronous otherwise:
//! the placeholder content carries the literal `Research started` marker
//! and the client follows the trace via SSE or the response poll.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;

use pandora_domain::policy::Mode;

use crate::runtime::scheduler::{self, TurnRequest};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatCompletionsRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessageBody>,
    /// Profile namespace (OpenAI's `user` field).
    #[serde(default)]
    pub user: Option<String>,
    /// Capability mode for this turn.
    #[serde(default)]
    pub mode: Option<Mode>,
    /// Per-request soft deadline override, seconds.
    #[serde(default)]
    pub soft_deadline_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessageBody {
    pub role: String,
    pub content: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(body): Json<ChatCompletionsRequest>,
) -> impl IntoResponse {
    let Some(query) = body
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
    else {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "no user message in request" })),
        )
            .into_response();
    };

    let profile = body.user.clone().unwrap_or_else(|| "default".to_string());
    let mode = body.mode.unwrap_or(Mode::Chat);
    let soft_deadline = std::time::Duration::from_secs(
        body.soft_deadline_seconds
            .unwrap_or(state.config.server.soft_deadline_seconds),
    );
    let model = body.model.unwrap_or_else(|| state.config.llm.model.clone());

    let (trace_id, handle) = scheduler::launch(
        state.clone(),
        TurnRequest {
            profile,
            query,
            mode,
        },
    );

    // Synchronous iff the pipeline beats the soft deadline. Dropping the
    // handle on timeout detaches the turn; it keeps running and stays
    // retrievable via `/v1/thinking` and `/v1/response`.
    tokio::pin!(handle);
    let content = tokio::select! {
        joined = &mut handle => match joined {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => format!("The request could not be completed ({}): {e}", e.kind()),
            Err(_) => "The request could not be completed (internal): run aborted".to_string(),
        },
        _ = tokio::time::sleep(soft_deadline) => {
            tracing::debug!(%trace_id, "soft deadline reached, answering async");
            format!(
                "Research started — follow trace {trace_id} for progress and poll \
                 /v1/response/{trace_id} for the result."
            )
        }
    };

    Json(completion_body(&trace_id, &model, &content)).into_response()
}

fn completion_body(trace_id: &str, model: &str, content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": trace_id,
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "trace_id": trace_id,
    })
}
