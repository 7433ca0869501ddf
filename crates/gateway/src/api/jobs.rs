//! Job endpoints — forced-async turns.
//!
//! - `POST /jobs/start`        — like chat, but always async
//! - `GET  /jobs`              — list with status filter
//! - `GET  /jobs/:job_id`      — job status + result/error
//! - `POST /jobs/:job_id/cancel`

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use pandora_domain::policy::Mode;

use crate::runtime::jobs::JobStatus;
use crate::runtime::scheduler::{self, TurnRequest};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /jobs/start
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    pub message: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub mode: Option<Mode>,
}

pub async fn start_job(
    State(state): State<AppState>,
    Json(body): Json<StartJobRequest>,
) -> impl IntoResponse {
    if body.message.trim().is_empty() {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "message must not be empty" })),
        )
            .into_response();
    }

    let profile = body.user.unwrap_or_else(|| "default".to_string());
    let mode = body.mode.unwrap_or(Mode::Chat);

    let (trace_id, handle) = scheduler::launch(
        state.clone(),
        TurnRequest {
            profile: profile.clone(),
            query: body.message.clone(),
            mode,
        },
    );
    let job_id = state
        .jobs
        .start(&profile, &trace_id, &body.message, handle);

    Json(serde_json::json!({ "job_id": job_id, "trace_id": trace_id })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /jobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "d_limit")]
    pub limit: usize,
}

fn d_limit() -> usize {
    50
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> impl IntoResponse {
    let status = query.status.as_deref().and_then(parse_status);
    let jobs = state.jobs.list(status, query.limit.min(200));
    Json(serde_json::json!({ "jobs": jobs, "count": jobs.len() }))
}

fn parse_status(s: &str) -> Option<JobStatus> {
    match s {
        "queued" => Some(JobStatus::Queued),
        "running" => Some(JobStatus::Running),
        "done" => Some(JobStatus::Done),
        "cancelled" => Some(JobStatus::Cancelled),
        "error" => Some(JobStatus::Error),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /jobs/:job_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.jobs.get(&job_id) {
        Some(job) => Json(serde_json::json!(job)).into_response(),
        None => (
            axum::http::StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "job not found" })),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /jobs/:job_id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let Some(job) = state.jobs.get(&job_id) else {
        return Json(serde_json::json!({ "ok": false }));
    };
    let marked = state.jobs.cancel(&job_id);
    // Either cancel surface must succeed: propagate to the pipeline too.
    let signalled = scheduler::cancel_trace(&state, &job.trace_id, "cancelled via job");
    Json(serde_json::json!({ "ok": marked || signalled }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_known_values_only() {
        assert_eq!(parse_status("done"), Some(JobStatus::Done));
        assert_eq!(parse_status("cancelled"), Some(JobStatus::Cancelled));
        assert_eq!(parse_status("bogus"), None);
    }
}
