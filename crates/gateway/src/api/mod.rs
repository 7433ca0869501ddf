pub mod admin;
pub mod auth;
pub mod chat;
pub mod interventions;
pub mod jobs;
pub mod permissions;
pub mod policy;
pub mod response;
pub mod thinking;
pub mod ws;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (health only) and **protected**
/// (gated behind the bearer-token middleware when a token is configured).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(admin::health));

    let protected = Router::new()
        // Turn intake + delivery
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/thinking/:trace_id", get(thinking::thinking_sse))
        .route("/v1/thinking/:trace_id/cancel", post(thinking::cancel_trace))
        .route("/v1/response/:trace_id", get(response::get_response))
        .route("/v1/traces", get(admin::list_traces))
        // Jobs (forced-async turns)
        .route("/jobs/start", post(jobs::start_job))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:job_id", get(jobs::get_job))
        .route("/jobs/:job_id/cancel", post(jobs::cancel_job))
        // Interventions (human-assist)
        .route("/interventions/pending", get(interventions::list_pending))
        .route("/interventions/:id/resolve", post(interventions::resolve))
        // Permission requests (write confirms)
        .route("/permissions/pending", get(permissions::list_pending))
        .route("/permissions/:id/approve", post(permissions::approve))
        .route("/permissions/:id/deny", post(permissions::deny))
        // Policy
        .route("/v1/policy/:profile", get(policy::get_policy))
        .route("/v1/policy/:profile", put(policy::set_policy))
        // Live research feed
        .route("/ws/research/:session_id", get(ws::research_ws))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
