//! End-to-end pipeline scenarios against a scripted LLM and scripted web
//! collaborators: no network, no real model.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use pandora_domain::config::Config;
use pandora_domain::error::Error;
use pandora_domain::plan::SourceType;
use pandora_domain::policy::Mode;
use pandora_domain::research::{BlockerType, Candidate, InterventionResolution};
use pandora_domain::trace::TraceStatus;
use pandora_gateway::runtime::scheduler::{self, TurnRequest};
use pandora_gateway::state::{build_state, AppState};
use pandora_providers::{ChatRequest, ChatResponse, LlmClient};
use pandora_tools::web::{FetchOutcome, PageFetcher, SearchProvider};
use pandora_turns::Section;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Routes each LLM call by a marker substring of its system prompt, so
/// concurrent turns cannot interleave each other's scripts.
struct PromptRouterClient {
    replies: HashMap<&'static str, String>,
}

impl PromptRouterClient {
    fn new(replies: Vec<(&'static str, String)>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
        }
    }
}

fn reply(marker: &'static str, body: &str) -> (&'static str, String) {
    (marker, body.to_string())
}

#[async_trait::async_trait]
impl LlmClient for PromptRouterClient {
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
        Err(Error::Llm(format!(
            "no scripted reply for system prompt: {}",
            &system[..system.len().min(60)]
        )))
    }

    fn client_id(&self) -> &str {
        "prompt-router"
    }
}

const ANALYZER: &str = "classify user queries";
const REFLECTION: &str = "gate an assistant pipeline";
const PLANNER: &str = "plan how an assistant";
const INVOCATIONS: &str = "turn a plan into concrete tool calls";
const SYNTHESIS: &str = "write the final answer";
const VALIDATION: &str = "review a drafted answer";

struct FixedSearch {
    candidates: Vec<Candidate>,
}

#[async_trait::async_trait]
impl SearchProvider for FixedSearch {
    async fn search(&self, _query: &str, limit: usize) -> pandora_domain::Result<Vec<Candidate>> {
        Ok(self.candidates.iter().take(limit).cloned().collect())
    }
}

/// Per-URL queues of fetch outcomes; the last outcome repeats once the
/// queue drains (coordinator rechecks reuse it).
struct QueuedFetcher {
    queues: Mutex<HashMap<String, Vec<FetchOutcome>>>,
}

impl QueuedFetcher {
    fn new(entries: Vec<(&str, Vec<FetchOutcome>)>) -> Self {
        Self {
            queues: Mutex::new(
                entries
                    .into_iter()
                    .map(|(url, outcomes)| (url.to_string(), outcomes))
                    .collect(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl PageFetcher for QueuedFetcher {
    async fn fetch(&self, url: &str) -> pandora_domain::Result<FetchOutcome> {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(url) else {
            return Ok(FetchOutcome::Blocked {
                blocker_type: BlockerType::UnknownBlocker,
                screenshot_path: None,
                cdp_url: None,
            });
        };
        if queue.len() > 1 {
            Ok(queue.remove(0))
        } else {
            Ok(queue[0].clone())
        }
    }
}

fn page(content: &str) -> FetchOutcome {
    FetchOutcome::Page {
        content: content.to_string(),
        bytes: content.len(),
    }
}

fn captcha() -> FetchOutcome {
    FetchOutcome::Blocked {
        blocker_type: BlockerType::CaptchaGeneric,
        screenshot_path: Some("/tmp/shot.png".into()),
        cdp_url: None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn test_config(root: &Path) -> Arc<Config> {
    let mut config = Config::default();
    config.store.root = root.to_path_buf();
    Arc::new(config)
}

fn state_with(
    root: &Path,
    llm: PromptRouterClient,
    search: Vec<Candidate>,
    fetches: Vec<(&str, Vec<FetchOutcome>)>,
) -> AppState {
    build_state(
        test_config(root),
        Arc::new(llm),
        Arc::new(FixedSearch { candidates: search }),
        Arc::new(QueuedFetcher::new(fetches)),
    )
    .unwrap()
}

fn candidate(url: &str, title: &str) -> Candidate {
    Candidate {
        url: url.into(),
        title: title.into(),
        snippet: None,
        source_type: SourceType::Unknown,
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn informational_script() -> Vec<(&'static str, String)> {
    vec![
        reply(
            ANALYZER,
            r#"{"intent":"informational","topic":"boiling point of water","keywords":["boiling","water","sea level"],"confidence":0.95}"#,
        ),
        reply(REFLECTION, r#"{"decision":"proceed","confidence":0.9}"#),
        reply(
            PLANNER,
            r#"{"goal":"state the boiling point","approach":"answer from well-known physical constants","likely_tools":[],"route":"synthesis","confidence":0.92}"#,
        ),
        reply(
            SYNTHESIS,
            "Water boils at 100 °C (212 °F) at sea level, at standard atmospheric pressure of 101.325 kPa.",
        ),
        reply(VALIDATION, r#"{"decision":"approve","quality":0.93}"#),
    ]
}

fn commerce_script() -> Vec<(&'static str, String)> {
    vec![
        reply(
            ANALYZER,
            r#"{"intent":"commerce","topic":"Logitech MX Master 3S price","keywords":["logitech","mx master","price"],"confidence":0.9}"#,
        ),
        reply(REFLECTION, r#"{"decision":"proceed","confidence":0.85}"#),
        reply(
            PLANNER,
            r#"{"goal":"current MX Master 3S price at major US retailers","approach":"search retailers and verify product pages","likely_tools":["web.search","web.fetch"],"route":"executor","confidence":0.88}"#,
        ),
        reply(
            SYNTHESIS,
            "The Logitech MX Master 3S is listed at $99.99 at Best Buy and $97.95 at Amazon (verified on the product pages).",
        ),
        reply(VALIDATION, r#"{"decision":"approve","quality":0.9}"#),
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1 — fast informational turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread")]
async fn fast_informational_turn_completes_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(
        dir.path(),
        PromptRouterClient::new(informational_script()),
        vec![],
        vec![],
    );

    let (trace_id, handle) = scheduler::launch(
        state.clone(),
        TurnRequest {
            profile: "alice".into(),
            query: "What is the boiling point of water at sea level?".into(),
            mode: Mode::Chat,
        },
    );

    let response = handle.await.unwrap().unwrap();
    assert!(response.contains("100 °C"));

    // Dual delivery: the poll returns the same text after completion.
    let record = state.hub.get(&trace_id).unwrap();
    assert_eq!(record.status, TraceStatus::Complete);
    let (status, polled) = state.hub.get_response(&trace_id).unwrap();
    assert_eq!(status, TraceStatus::Complete);
    assert_eq!(polled.as_deref(), Some(response.as_str()));

    // The turn document is closed and sectioned in phase order.
    let turn_id = record.turn_id.unwrap();
    assert!(state.store.is_closed("alice", turn_id));
    let context = state
        .store
        .read_section("alice", turn_id, Section::Context)
        .unwrap();
    let analysis_pos = context.find("intent: informational").unwrap();
    let plan_pos = context.find("route: synthesis").unwrap();
    let synth_pos = context.find("100 °C").unwrap();
    let validation_pos = context.find("decision: approve").unwrap();
    assert!(analysis_pos < plan_pos && plan_pos < synth_pos && synth_pos < validation_pos);

    // Events carry strictly increasing seq numbers.
    let subscription = state.hub.subscribe(&trace_id).unwrap();
    let seqs: Vec<u64> = subscription.replay.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    assert!(!seqs.is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2 — research turn with a CAPTCHA blocker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread")]
async fn research_turn_suspends_on_blocker_and_resumes_after_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let mx_page = "Logitech MX Master 3S wireless mouse. Price: $99.99. In stock.";
    let state = state_with(
        dir.path(),
        PromptRouterClient::new(commerce_script()),
        vec![
            candidate("https://www.amazon.com/mx-master-3s", "Amazon: MX Master 3S"),
            candidate("https://www.bestbuy.com/mx-master-3s", "Best Buy: MX Master 3S"),
        ],
        vec![
            (
                "https://www.amazon.com/mx-master-3s",
                vec![captcha(), page(mx_page)],
            ),
            ("https://www.bestbuy.com/mx-master-3s", vec![page(mx_page)]),
        ],
    );

    let (trace_id, handle) = scheduler::launch(
        state.clone(),
        TurnRequest {
            profile: "alice".into(),
            query: "Find current price of Logitech MX Master 3S at major US retailers".into(),
            mode: Mode::Chat,
        },
    );

    // The CAPTCHA suspends the candidate; exactly one pending intervention.
    let broker = state.interventions.clone();
    wait_for("pending intervention", || broker.pending_count() == 1).await;
    let pending = broker.list_pending(None);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].trace_id, trace_id);
    assert_eq!(pending[0].blocker_type, BlockerType::CaptchaGeneric);
    assert_eq!(pending[0].url, "https://www.amazon.com/mx-master-3s");

    // Human resolves; the pipeline refetches and completes.
    assert!(broker.resolve(&pending[0].intervention_id, InterventionResolution::Ok));
    let response = handle.await.unwrap().unwrap();
    assert!(response.contains("$99.99"));

    // Evidence made it into research.md; the vendor recheck upgraded it.
    let turn_id = state.hub.get(&trace_id).unwrap().turn_id.unwrap();
    let research = state
        .store
        .read_section("alice", turn_id, Section::Research)
        .unwrap();
    assert!(research.contains("Evidence ledger"));
    assert!(research.contains("bestbuy.com"));

    let toolresults = state
        .store
        .read_section("alice", turn_id, Section::ToolResults)
        .unwrap();
    assert!(toolresults.contains("web.search"));
    assert!(toolresults.contains("web.fetch"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3 — cancellation mid-research
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_mid_research_skips_intervention_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(
        dir.path(),
        PromptRouterClient::new(commerce_script()),
        vec![candidate(
            "https://www.amazon.com/mx-master-3s",
            "Amazon: MX Master 3S",
        )],
        vec![("https://www.amazon.com/mx-master-3s", vec![captcha()])],
    );

    let (trace_id, handle) = scheduler::launch(
        state.clone(),
        TurnRequest {
            profile: "alice".into(),
            query: "Find current price of Logitech MX Master 3S at major US retailers".into(),
            mode: Mode::Chat,
        },
    );

    wait_for("pending intervention", || {
        state.interventions.pending_count() == 1
    })
    .await;

    // Job wrapping the same turn, then cancel by trace.
    let job_id = state.jobs.start("alice", &trace_id, "find price", handle);
    assert!(scheduler::cancel_trace(&state, &trace_id, "test cancel"));

    wait_for("terminal trace", || {
        state
            .hub
            .get(&trace_id)
            .map(|r| r.status.is_terminal())
            .unwrap_or(false)
    })
    .await;

    let record = state.hub.get(&trace_id).unwrap();
    assert_eq!(record.status, TraceStatus::Cancelled);

    // Open intervention was marked skipped.
    assert_eq!(state.interventions.pending_count(), 0);

    // The poll returns the cancellation notice as a complete response.
    let (status, response) = state.hub.get_response(&trace_id).unwrap();
    assert_eq!(status, TraceStatus::Cancelled);
    assert!(response.unwrap().contains("cancelled"));

    // Job lands terminal cancelled.
    wait_for("cancelled job", || {
        state
            .jobs
            .get(&job_id)
            .map(|j| j.status.is_terminal())
            .unwrap_or(false)
    })
    .await;
    assert_eq!(
        state.jobs.get(&job_id).unwrap().status,
        pandora_gateway::runtime::jobs::JobStatus::Cancelled
    );

    // The turn document is closed with a cancellation marker.
    let turn_id = record.turn_id.unwrap();
    assert!(state.store.is_closed("alice", turn_id));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 4 — SSE disconnect, poll recovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread")]
async fn response_is_pollable_after_completion_without_sse() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(
        dir.path(),
        PromptRouterClient::new(informational_script()),
        vec![],
        vec![],
    );

    let (trace_id, handle) = scheduler::launch(
        state.clone(),
        TurnRequest {
            profile: "alice".into(),
            query: "What is the boiling point of water at sea level?".into(),
            mode: Mode::Chat,
        },
    );

    // Subscribe, then drop the subscription before the terminal signal
    // (the severed-SSE case).
    let subscription = state.hub.subscribe(&trace_id).unwrap();
    drop(subscription);

    let expected = handle.await.unwrap().unwrap();

    // Poll recovery: the response is retrievable and the trace survives a
    // sweep because only one channel delivered.
    let (status, response) = state.hub.get_response(&trace_id).unwrap();
    assert_eq!(status, TraceStatus::Complete);
    assert_eq!(response.as_deref(), Some(expected.as_str()));

    assert_eq!(state.hub.sweep(), 0);
    assert!(state.hub.get(&trace_id).is_some());

    // Once SSE delivery is also acknowledged the sweep may reclaim it.
    state.hub.mark_sse_delivered(&trace_id);
    assert_eq!(state.hub.sweep(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 5 — policy denial in chat mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread")]
async fn chat_mode_file_write_is_denied_and_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("notes.txt");
    let target_str = target.to_string_lossy().to_string();

    let script = vec![
        reply(
            ANALYZER,
            r#"{"intent":"code","topic":"write a note","keywords":["note"],"confidence":0.9}"#,
        ),
        reply(REFLECTION, r#"{"decision":"proceed","confidence":0.9}"#),
        reply(
            PLANNER,
            r#"{"goal":"write the note to disk","approach":"use the file tools","likely_tools":["fs.write"],"route":"executor","confidence":0.85}"#,
        ),
        (
            INVOCATIONS,
            format!(
                r#"{{"invocations":[{{"tool":"fs.write","args":{{"path":"{target_str}","content":"hello"}}}}]}}"#
            ),
        ),
        reply(
            SYNTHESIS,
            "I could not write the file: filesystem writes are not permitted in chat mode.",
        ),
        reply(VALIDATION, r#"{"decision":"approve","quality":0.8}"#),
    ];

    let state = state_with(
        dir.path(),
        PromptRouterClient::new(script),
        vec![],
        vec![],
    );

    let (trace_id, handle) = scheduler::launch(
        state.clone(),
        TurnRequest {
            profile: "alice".into(),
            query: "Save a note saying hello to notes.txt".into(),
            mode: Mode::Chat,
        },
    );

    let response = handle.await.unwrap().unwrap();
    assert!(response.contains("not permitted"));

    // No file reached the backing store.
    assert!(!target.exists());

    // The denial is recorded in toolresults.md.
    let turn_id = state.hub.get(&trace_id).unwrap().turn_id.unwrap();
    let toolresults = state
        .store
        .read_section("alice", turn_id, Section::ToolResults)
        .unwrap();
    assert!(toolresults.contains("blocked_by_policy"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 6 — concurrent turns, distinct ids
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_turns_get_distinct_ids_without_crosstalk() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(
        dir.path(),
        PromptRouterClient::new(informational_script()),
        vec![],
        vec![],
    );

    let (trace_a, handle_a) = scheduler::launch(
        state.clone(),
        TurnRequest {
            profile: "alice".into(),
            query: "What is the boiling point of water at sea level?".into(),
            mode: Mode::Chat,
        },
    );
    let (trace_b, handle_b) = scheduler::launch(
        state.clone(),
        TurnRequest {
            profile: "alice".into(),
            query: "What is the boiling point of water on Everest?".into(),
            mode: Mode::Chat,
        },
    );
    assert_ne!(trace_a, trace_b);

    let (a, b) = tokio::join!(handle_a, handle_b);
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    let turn_a = state.hub.get(&trace_a).unwrap().turn_id.unwrap();
    let turn_b = state.hub.get(&trace_b).unwrap().turn_id.unwrap();
    assert_ne!(turn_a, turn_b);

    // No cross-talk: each document names its own turn.
    let context_a = state
        .store
        .read_section("alice", turn_a, Section::Context)
        .unwrap();
    let context_b = state
        .store
        .read_section("alice", turn_b, Section::Context)
        .unwrap();
    assert!(context_a.starts_with(&format!("# Turn {turn_a}")));
    assert!(context_b.starts_with(&format!("# Turn {turn_b}")));
    assert!(state.store.is_closed("alice", turn_a));
    assert!(state.store.is_closed("alice", turn_b));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Clarify fast path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread")]
async fn clarify_short_circuits_to_synthesis_without_validation() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(
        dir.path(),
        PromptRouterClient::new(vec![
            reply(
                ANALYZER,
                r#"{"intent":"clarify","topic":"ambiguous request","keywords":[],"confidence":0.7}"#,
            ),
            reply(
                REFLECTION,
                r#"{"decision":"clarify","question":"Which city do you mean?","confidence":0.8}"#,
            ),
            // No planner/synthesis/validation replies on purpose: the fast
            // path must not call them.
        ]),
        vec![],
        vec![],
    );

    let (trace_id, handle) = scheduler::launch(
        state.clone(),
        TurnRequest {
            profile: "alice".into(),
            query: "What's the weather there?".into(),
            mode: Mode::Chat,
        },
    );

    let response = handle.await.unwrap().unwrap();
    assert!(response.contains("Which city do you mean?"));

    let turn_id = state.hub.get(&trace_id).unwrap().turn_id.unwrap();
    let context = state
        .store
        .read_section("alice", turn_id, Section::Context)
        .unwrap();
    assert!(context.contains("decision: clarify"));
    // Validation never ran.
    let validation = state
        .store
        .read_subsection("alice", turn_id, pandora_domain::trace::Phase::Validation)
        .unwrap();
    assert!(validation.trim().is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation revise path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(flavor = "multi_thread")]
async fn revise_reruns_synthesis_once() {
    struct ReviseOnceClient {
        inner: PromptRouterClient,
        validations: Mutex<usize>,
        syntheses: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl LlmClient for ReviseOnceClient {
        async fn complete(&self, req: ChatRequest) -> pandora_domain::Result<ChatResponse> {
            let system = req.messages[0].content.clone();
            if system.contains(VALIDATION) {
                let mut count = self.validations.lock();
                *count += 1;
                return Ok(ChatResponse {
                    content: r#"{"decision":"revise","reason":"missing the unit","quality":0.6}"#
                        .into(),
                    usage: None,
                    model: "scripted".into(),
                });
            }
            if system.contains(SYNTHESIS) {
                let mut count = self.syntheses.lock();
                *count += 1;
                let content = if *count == 1 {
                    "Water boils at 100."
                } else {
                    "Water boils at 100 °C at sea level."
                };
                return Ok(ChatResponse {
                    content: content.into(),
                    usage: None,
                    model: "scripted".into(),
                });
            }
            self.inner.complete(req).await
        }

        fn client_id(&self) -> &str {
            "revise-once"
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let client = ReviseOnceClient {
        inner: PromptRouterClient::new(informational_script()),
        validations: Mutex::new(0),
        syntheses: Mutex::new(0),
    };
    let state = build_state(
        test_config(dir.path()),
        Arc::new(client),
        Arc::new(FixedSearch { candidates: vec![] }),
        Arc::new(QueuedFetcher::new(vec![])),
    )
    .unwrap();

    let (_trace_id, handle) = scheduler::launch(
        state.clone(),
        TurnRequest {
            profile: "alice".into(),
            query: "What is the boiling point of water at sea level?".into(),
            mode: Mode::Chat,
        },
    );

    // One validation, one revise: the second synthesis output wins.
    let response = handle.await.unwrap().unwrap();
    assert_eq!(response, "Water boils at 100 °C at sea level.");
}
