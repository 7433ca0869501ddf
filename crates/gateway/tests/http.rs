//! HTTP contract tests: the wire shapes clients depend on, driven through
//! the router with `tower::ServiceExt::oneshot`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use pandora_domain::config::Config;
use pandora_domain::error::Error;
use pandora_domain::research::{BlockerType, Candidate};
use pandora_gateway::api;
use pandora_gateway::state::{build_state, AppState};
use pandora_providers::{ChatRequest, ChatResponse, LlmClient};
use pandora_tools::web::{FetchOutcome, PageFetcher, SearchProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct MarkerClient {
    replies: HashMap<&'static str, String>,
}

#[async_trait::async_trait]
impl LlmClient for MarkerClient {
    async fn complete(&self, req: ChatRequest) -> pandora_domain::Result<ChatResponse> {
        let system = &req.messages[0].content;
        for (marker, reply) in &self.replies {
            if system.contains(marker) {
                return Ok(ChatResponse {
                    content: reply.clone(),
                    usage: None,
                    model: "scripted".into(),
                });
            }
        }
        Err(Error::Llm("unscripted call".into()))
    }

    fn client_id(&self) -> &str {
        "marker"
    }
}

struct EmptySearch;

#[async_trait::async_trait]
impl SearchProvider for EmptySearch {
    async fn search(&self, _q: &str, _limit: usize) -> pandora_domain::Result<Vec<Candidate>> {
        Ok(Vec::new())
    }
}

struct BlockedFetcher;

#[async_trait::async_trait]
impl PageFetcher for BlockedFetcher {
    async fn fetch(&self, _url: &str) -> pandora_domain::Result<FetchOutcome> {
        Ok(FetchOutcome::Blocked {
            blocker_type: BlockerType::UnknownBlocker,
            screenshot_path: None,
            cdp_url: None,
        })
    }
}

fn answering_client() -> MarkerClient {
    let mut replies = HashMap::new();
    replies.insert(
        "classify user queries",
        r#"{"intent":"informational","topic":"water","keywords":["water"],"confidence":0.9}"#
            .to_string(),
    );
    replies.insert("gate an assistant pipeline", r#"{"decision":"proceed"}"#.to_string());
    replies.insert(
        "plan how an assistant",
        r#"{"goal":"answer","approach":"direct","likely_tools":[],"route":"synthesis"}"#
            .to_string(),
    );
    replies.insert(
        "write the final answer",
        "Water boils at 100 °C at sea level.".to_string(),
    );
    replies.insert(
        "review a drafted answer",
        r#"{"decision":"approve","quality":0.9}"#.to_string(),
    );
    MarkerClient { replies }
}

/// A client that never answers within the soft deadline.
struct StallingClient;

#[async_trait::async_trait]
impl LlmClient for StallingClient {
    async fn complete(&self, _req: ChatRequest) -> pandora_domain::Result<ChatResponse> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Err(Error::Llm("unreachable".into()))
    }

    fn client_id(&self) -> &str {
        "stalling"
    }
}

fn make_state(root: &std::path::Path, llm: Arc<dyn LlmClient>) -> AppState {
    let mut config = Config::default();
    config.store.root = root.to_path_buf();
    build_state(
        Arc::new(config),
        llm,
        Arc::new(EmptySearch),
        Arc::new(BlockedFetcher),
    )
    .unwrap()
}

fn app(state: AppState) -> axum::Router {
    api::router(state.clone()).with_state(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Contracts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_component_counts() {
    let dir = tempfile::tempdir().unwrap();
    let state = make_state(dir.path(), Arc::new(answering_client()));

    let response = app(state).oneshot(get("/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["tools"], 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_completion_is_openai_shaped_and_synchronous_when_fast() {
    let dir = tempfile::tempdir().unwrap();
    let state = make_state(dir.path(), Arc::new(answering_client()));

    let response = app(state)
        .oneshot(post_json(
            "/v1/chat/completions",
            serde_json::json!({
                "messages": [{"role": "user", "content": "Boiling point of water?"}],
                "user": "alice",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert_eq!(body["object"], "chat.completion");
    assert!(body["trace_id"].as_str().unwrap().starts_with("tr_"));
    let content = body["choices"][0]["message"]["content"].as_str().unwrap();
    assert!(content.contains("100 °C"));
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_turn_answers_async_with_research_started_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let state = make_state(dir.path(), Arc::new(StallingClient));

    let response = app(state.clone())
        .oneshot(post_json(
            "/v1/chat/completions",
            serde_json::json!({
                "messages": [{"role": "user", "content": "slow question"}],
                "soft_deadline_seconds": 0,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    // Wire contract: the placeholder carries the literal marker string and
    // the trace id for follow-up.
    let content = body["choices"][0]["message"]["content"].as_str().unwrap();
    assert!(content.contains("Research started"));
    let trace_id = body["trace_id"].as_str().unwrap().to_string();
    assert!(content.contains(&trace_id));

    // The detached turn is pollable.
    let response = app(state)
        .oneshot(get(&format!("/v1/response/{trace_id}")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "pending");
}

#[tokio::test(flavor = "multi_thread")]
async fn response_poll_distinguishes_unknown_pending_complete() {
    let dir = tempfile::tempdir().unwrap();
    let state = make_state(dir.path(), Arc::new(answering_client()));

    // Unknown trace.
    let response = app(state.clone())
        .oneshot(get("/v1/response/tr_missing"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["status"], "not_found");

    // Completed trace.
    let trace_id = state.hub.create_trace("alice");
    state.hub.set_response(&trace_id, "R");
    state
        .hub
        .finish(&trace_id, pandora_domain::trace::TraceStatus::Complete);

    let response = app(state)
        .oneshot(get(&format!("/v1/response/{trace_id}")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "complete");
    assert_eq!(body["response"], "R");
}

#[tokio::test(flavor = "multi_thread")]
async fn errored_turn_polls_complete_with_human_readable_text() {
    let dir = tempfile::tempdir().unwrap();
    // Every LLM call fails outright: the analyzer phase errors the turn.
    let state = make_state(
        dir.path(),
        Arc::new(MarkerClient {
            replies: HashMap::new(),
        }),
    );

    let response = app(state.clone())
        .oneshot(post_json(
            "/jobs/start",
            serde_json::json!({ "message": "anything", "user": "alice" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    let trace_id = body["trace_id"].as_str().unwrap().to_string();
    let job_id = body["job_id"].as_str().unwrap().to_string();

    // Wait for the job to land in error.
    let mut status = String::new();
    for _ in 0..500 {
        let response = app(state.clone())
            .oneshot(get(&format!("/jobs/{job_id}")))
            .await
            .unwrap();
        status = body_json(response).await["status"]
            .as_str()
            .unwrap()
            .to_string();
        if status == "error" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(status, "error");

    let response = app(state)
        .oneshot(get(&format!("/v1/response/{trace_id}")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "complete");
    assert!(body["response"]
        .as_str()
        .unwrap()
        .contains("could not be completed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn job_cancel_endpoint_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let state = make_state(dir.path(), Arc::new(StallingClient));

    let response = app(state.clone())
        .oneshot(post_json(
            "/jobs/start",
            serde_json::json!({ "message": "slow question" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let response = app(state.clone())
        .oneshot(post_json(
            &format!("/jobs/{job_id}/cancel"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["ok"], true);

    // Cancel of an unknown job is not ok.
    let response = app(state)
        .oneshot(post_json("/jobs/job_missing/cancel", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["ok"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn intervention_resolve_is_idempotent_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let state = make_state(dir.path(), Arc::new(answering_client()));

    let iv = state.interventions.request(
        "tr_x",
        "alice",
        "https://blocked.example",
        BlockerType::CaptchaGeneric,
        None,
        None,
    );

    let response = app(state.clone())
        .oneshot(get("/interventions/pending"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(
        body["interventions"][0]["blocker_type"],
        "captcha_generic"
    );

    let response = app(state.clone())
        .oneshot(post_json(
            &format!("/interventions/{}/resolve", iv.intervention_id),
            serde_json::json!({ "resolved": true }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["ok"], true);

    // Second resolution is dropped.
    let response = app(state)
        .oneshot(post_json(
            &format!("/interventions/{}/resolve", iv.intervention_id),
            serde_json::json!({ "resolved": false }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["ok"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn bearer_auth_gates_protected_routes_but_not_health() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = make_state(dir.path(), Arc::new(answering_client()));
    // Simulate a configured token without touching process env.
    use sha2::Digest;
    state.api_token_hash = Some(sha2::Sha256::digest(b"sekrit").to_vec());

    // Health stays public.
    let response = app(state.clone()).oneshot(get("/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Protected route without a token is rejected.
    let response = app(state.clone()).oneshot(get("/jobs")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Wrong token is rejected.
    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .uri("/jobs")
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Correct token passes.
    let response = app(state)
        .oneshot(
            Request::builder()
                .uri("/jobs")
                .header("authorization", "Bearer sekrit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn policy_roundtrip_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let state = make_state(dir.path(), Arc::new(answering_client()));

    // Default chat policy denies writes.
    let response = app(state.clone())
        .oneshot(get("/v1/policy/alice?mode=chat"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["mode"], "chat");
    assert_eq!(body["allow_writes"], false);

    // Install a code policy and read it back.
    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v1/policy/alice")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "mode": "code",
                        "allow_writes": true,
                        "require_confirm": true,
                        "allowed_write_paths": ["/work"],
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["ok"], true);

    let response = app(state)
        .oneshot(get("/v1/policy/alice?mode=code"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["allow_writes"], true);
    assert_eq!(body["allowed_write_paths"][0], "/work");
}
