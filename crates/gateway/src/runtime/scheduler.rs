//! Pipeline Scheduler — drives the turn state machine exactly once per
//! trace.
//!
//! `CREATED → ANALYZED → (REFLECTED ∨ CLARIFYING) → CONTEXTED → PLANNED →
//! (EXECUTED → COORDINATED)? → SYNTHESIZED → (REVISED → SYNTHESIZED)? →
//! VALIDATED → SAVED`, with terminal states `SAVED`, `CANCELLED`, and
//! `FAILED`. Phases are strictly sequential within a turn; different turns
//! run in parallel up to `max_concurrent_turns`.

use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;

use pandora_domain::cancel::CancelToken;
use pandora_domain::error::{Error, Result};
use pandora_domain::ids::TurnId;
use pandora_domain::plan::{EvidenceLedger, Intent, Plan, ReflectionDecision, Route, ValidationDecision};
use pandora_domain::policy::{Mode, PolicyRecord};
use pandora_domain::trace::{FeedEvent, Phase, PhaseStatus, TraceEvent, TraceStatus};
use pandora_turns::document::TurnOutcome;
use pandora_turns::index::{spawn_index_write, TurnIndexEntry};
use pandora_turns::Section;
use pandora_tools::ToolCtx;

use crate::runtime::phases::{
    analyzer, context, coordinator, executor, planner, reflection, synthesis, validation,
};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Created,
    Analyzed,
    Reflected,
    Clarifying,
    Contexted,
    Planned,
    Executed,
    Coordinated,
    Synthesized,
    Revised,
    Validated,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request & context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub profile: String,
    pub query: String,
    pub mode: Mode,
}

/// Everything a phase runner needs, built once per turn.
pub struct TurnCtx {
    pub state: AppState,
    pub profile: String,
    pub trace_id: String,
    pub turn_id: TurnId,
    pub query: String,
    pub mode: Mode,
    pub cancel: CancelToken,
}

impl TurnCtx {
    pub fn emit(&self, event: TraceEvent) {
        self.state.hub.emit(&self.trace_id, event);
    }

    /// Emit a research/progress feed event, carried on the trace and
    /// relayed to WebSocket consumers.
    pub fn feed(&self, phase: Phase, event: FeedEvent) {
        let details = serde_json::to_value(&event).unwrap_or_default();
        self.emit(TraceEvent::active(phase).with_details(details));
    }

    pub fn append_subsection(&self, phase: Phase, text: &str) -> Result<()> {
        self.state
            .store
            .append_subsection(&self.profile, self.turn_id, phase, text)
    }

    pub fn append_section(&self, section: Section, text: &str) -> Result<()> {
        self.state
            .store
            .append_section(&self.profile, self.turn_id, section, text)
    }

    pub fn read_subsection(&self, phase: Phase) -> Result<String> {
        self.state
            .store
            .read_subsection(&self.profile, self.turn_id, phase)
    }

    pub fn tool_ctx(&self) -> ToolCtx {
        ToolCtx::new(self.profile.clone(), self.trace_id.clone(), self.cancel.clone())
    }

    /// Record one raw LLM exchange in `transcript.json` when transcripts
    /// are enabled. Transcript failures never fail the turn.
    pub fn record_llm_exchange(&self, role: pandora_providers::Role, prompt: &str, response: &str) {
        if !self.state.config.store.keep_transcripts {
            return;
        }
        let line = serde_json::json!({
            "at": Utc::now().to_rfc3339(),
            "role": role.name(),
            "prompt": prompt,
            "response": response,
        })
        .to_string();
        if let Err(e) = self.append_section(Section::Transcript, &line) {
            tracing::warn!(error = %e, "transcript append failed");
        }
    }

    pub fn policy(&self) -> PolicyRecord {
        self.state.policy.get_policy(&self.profile, self.mode)
    }
}

/// What a phase hands back to the scheduler alongside its value.
pub struct PhaseResult<T> {
    pub value: T,
    pub confidence: Option<f32>,
    pub reasoning: Option<String>,
}

impl<T> PhaseResult<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            confidence: None,
            reasoning: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Launch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Allocate a trace and spawn the turn. Returns immediately; the handle
/// resolves to the final response text (or the pipeline error). Dropping
/// the handle detaches the turn: it still runs to completion and remains
/// retrievable through the trace hub.
pub fn launch(state: AppState, request: TurnRequest) -> (String, JoinHandle<Result<String>>) {
    let trace_id = state.hub.create_trace(&request.profile);
    let cancel = state.cancel_map.register(&trace_id);

    let span = tracing::info_span!("turn", trace_id = %trace_id, profile = %request.profile);
    let task_trace_id = trace_id.clone();
    let handle = tokio::spawn(tracing::Instrument::instrument(
        async move {
            let result = run_turn(state.clone(), request, task_trace_id.clone(), cancel).await;
            state.cancel_map.remove(&task_trace_id);
            result
        },
        span,
    ));

    (trace_id, handle)
}

async fn run_turn(
    state: AppState,
    request: TurnRequest,
    trace_id: String,
    cancel: CancelToken,
) -> Result<String> {
    // Bound parallel schedulers; cancellation while queued still resolves.
    let _permit = tokio::select! {
        _ = cancel.cancelled() => {
            state.hub.cancel(&trace_id, "cancelled before start");
            return Err(Error::Cancelled);
        }
        permit = state.turn_permits.clone().acquire_owned() => {
            permit.map_err(|_| Error::Internal("turn semaphore closed".into()))?
        }
    };

    let (turn_id, _turn_dir) = state.store.open_turn(&request.profile)?;
    state.hub.set_turn(&trace_id, turn_id);

    let ctx = TurnCtx {
        state: state.clone(),
        profile: request.profile.clone(),
        trace_id: trace_id.clone(),
        turn_id,
        query: request.query.clone(),
        mode: request.mode,
        cancel,
    };

    match drive_phases(&ctx).await {
        Ok(saved) => {
            // Save: indexes off the critical path, then close, then deliver.
            spawn_index_write(
                state.index.clone(),
                state.vector.clone(),
                TurnIndexEntry {
                    turn_number: turn_id,
                    profile: ctx.profile.clone(),
                    topic: saved.topic,
                    intent: saved.intent,
                    quality: saved.quality,
                    turn_dir: state.store.turn_dir(&ctx.profile, turn_id),
                    created_at: Utc::now(),
                },
                saved.research_text,
            );
            // A close failure must not strand the trace: the response is
            // still delivered, the marker just stays missing.
            if let Err(e) = state
                .store
                .close_turn(&ctx.profile, turn_id, TurnOutcome::Saved)
            {
                tracing::warn!(error = %e, "closing saved turn failed");
            }
            state.hub.set_response(&trace_id, &saved.response);
            state.hub.finish(&trace_id, TraceStatus::Complete);
            tracing::info!("turn saved");
            Ok(saved.response)
        }
        Err(Error::Cancelled) => {
            state.interventions.skip_all_for_trace(&trace_id);
            let _ = state
                .store
                .close_turn(&ctx.profile, turn_id, TurnOutcome::Cancelled);
            state.hub.cancel(&trace_id, "caller requested");
            tracing::info!("turn cancelled");
            Err(Error::Cancelled)
        }
        Err(e) => {
            state.interventions.skip_all_for_trace(&trace_id);
            let phase = state.hub.get(&trace_id).and_then(|r| r.phase);
            let _ = state.store.close_turn(
                &ctx.profile,
                turn_id,
                TurnOutcome::Failed {
                    kind: e.kind().to_string(),
                    phase: phase.map(|p| p.name().to_string()),
                    message: e.to_string(),
                },
            );
            state.hub.set_response(
                &trace_id,
                &format!("The request could not be completed ({}): {e}", e.kind()),
            );
            state.hub.finish(&trace_id, TraceStatus::Error);
            tracing::warn!(error = %e, "turn failed");
            Err(e)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase sequencing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SavedTurn {
    response: String,
    topic: String,
    intent: Intent,
    quality: f32,
    research_text: Option<String>,
}

async fn drive_phases(ctx: &TurnCtx) -> Result<SavedTurn> {
    let mut turn_state = TurnState::Created;

    let analysis = run_phase(ctx, Phase::Analyzer, analyzer::run(ctx)).await?;
    transition(&mut turn_state, TurnState::Analyzed);

    let decision = run_phase(ctx, Phase::Reflection, reflection::run(ctx, &analysis)).await?;
    if let ReflectionDecision::Clarify { question } = decision {
        // Fast path: jump straight to synthesis with the fixed clarifying
        // template; validation is skipped.
        transition(&mut turn_state, TurnState::Clarifying);
        let text = synthesis::clarify_template(&question);
        run_phase(ctx, Phase::Synthesis, synthesis::run_fixed(ctx, &text)).await?;
        transition(&mut turn_state, TurnState::Synthesized);
        return Ok(SavedTurn {
            response: text,
            topic: analysis.topic,
            intent: analysis.intent,
            quality: 0.0,
            research_text: None,
        });
    }
    transition(&mut turn_state, TurnState::Reflected);

    let digest = run_phase(ctx, Phase::Context, context::run(ctx, &analysis)).await?;
    transition(&mut turn_state, TurnState::Contexted);

    let plan = run_phase(ctx, Phase::Planner, planner::run(ctx, &analysis, &digest)).await?;
    transition(&mut turn_state, TurnState::Planned);

    if plan.route == Route::Clarify {
        transition(&mut turn_state, TurnState::Clarifying);
        let text = synthesis::clarify_template(&plan.goal);
        run_phase(ctx, Phase::Synthesis, synthesis::run_fixed(ctx, &text)).await?;
        transition(&mut turn_state, TurnState::Synthesized);
        return Ok(SavedTurn {
            response: text,
            topic: analysis.topic,
            intent: analysis.intent,
            quality: 0.0,
            research_text: None,
        });
    }

    let mut ledger = EvidenceLedger::default();
    let mut research_text = None;
    if plan.route == Route::Executor {
        let outcome = run_phase(ctx, Phase::Executor, executor::run(ctx, &plan, &analysis)).await?;
        ledger = outcome.ledger;
        research_text = outcome.research_text;
        transition(&mut turn_state, TurnState::Executed);

        if needs_coordination(&analysis, &plan) {
            ledger = run_phase(ctx, Phase::Coordinator, coordinator::run(ctx, ledger)).await?;
            transition(&mut turn_state, TurnState::Coordinated);
        }
    }

    let mut response =
        run_phase(ctx, Phase::Synthesis, synthesis::run(ctx, &analysis, &ledger, None)).await?;
    transition(&mut turn_state, TurnState::Synthesized);

    let report = run_phase(ctx, Phase::Validation, validation::run(ctx, &response)).await?;
    let quality = report.quality;
    match report.decision {
        ValidationDecision::Approve => {}
        ValidationDecision::Revise { reason } => {
            transition(&mut turn_state, TurnState::Revised);
            response = run_phase(
                ctx,
                Phase::Synthesis,
                synthesis::run(ctx, &analysis, &ledger, Some(&reason)),
            )
            .await?;
            transition(&mut turn_state, TurnState::Synthesized);
        }
        ValidationDecision::Retry { reason } => {
            return Err(Error::PhaseFailed {
                phase: Phase::Validation,
                reason: format!("validation requested retry: {reason}"),
            });
        }
    }
    transition(&mut turn_state, TurnState::Validated);

    Ok(SavedTurn {
        response,
        topic: analysis.topic,
        intent: analysis.intent,
        quality,
        research_text,
    })
}

/// Coordination is a commerce-verification pass; for other plans it is
/// merged into the executor.
fn needs_coordination(analysis: &pandora_domain::plan::QueryAnalysis, plan: &Plan) -> bool {
    plan.route == Route::Executor
        && matches!(analysis.intent, Intent::Commerce | Intent::Mixed)
}

fn transition(current: &mut TurnState, next: TurnState) {
    tracing::debug!(from = ?current, to = ?next, "turn state");
    *current = next;
}

/// Run one phase with the shared envelope: cancellation check, `active`
/// event, soft budget warning, `completed`/`error` event.
async fn run_phase<T>(
    ctx: &TurnCtx,
    phase: Phase,
    fut: impl Future<Output = Result<PhaseResult<T>>>,
) -> Result<T> {
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    ctx.emit(TraceEvent::active(phase));
    ctx.feed(phase, FeedEvent::PhaseStarted { phase });
    let started = Instant::now();

    let budget = ctx.state.config.phases.budget_for(phase);
    tokio::pin!(fut);
    let result = tokio::select! {
        result = &mut fut => result,
        _ = tokio::time::sleep(budget) => {
            // Budget overrun warns but never kills the phase.
            tracing::warn!(phase = phase.name(), budget_secs = budget.as_secs(), "phase over budget");
            ctx.feed(
                phase,
                FeedEvent::Progress {
                    message: format!(
                        "{phase} is taking longer than its {}s budget",
                        budget.as_secs()
                    ),
                },
            );
            fut.await
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(outcome) => {
            let mut event = TraceEvent::completed(phase, outcome.confidence, duration_ms);
            if let Some(reasoning) = &outcome.reasoning {
                event = event.with_reasoning(reasoning.clone());
            }
            ctx.emit(event);
            ctx.feed(phase, FeedEvent::PhaseComplete { phase });
            Ok(outcome.value)
        }
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(e) => {
            ctx.emit(TraceEvent {
                seq: 0,
                phase,
                status: PhaseStatus::Error,
                reasoning: Some(e.to_string()),
                confidence: None,
                duration_ms: Some(duration_ms),
                details: None,
            });
            // Timeouts keep their kind; everything else becomes a phase
            // failure attributed to this phase.
            match e {
                Error::Timeout(kind) => Err(Error::Timeout(kind)),
                Error::PhaseFailed { phase, reason } => Err(Error::PhaseFailed { phase, reason }),
                other => Err(Error::PhaseFailed {
                    phase,
                    reason: other.to_string(),
                }),
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// External cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cancel a trace from the API surface. Signals the running pipeline's
/// token when there is one; otherwise finalizes the trace directly.
/// Returns whether anything was cancelled.
pub fn cancel_trace(state: &AppState, trace_id: &str, reason: &str) -> bool {
    if state.cancel_map.cancel(trace_id) {
        tracing::info!(trace_id, reason, "cancellation signalled to pipeline");
        return true;
    }
    match state.hub.get(trace_id) {
        Some(record) if !record.status.is_terminal() => {
            state.interventions.skip_all_for_trace(trace_id);
            state.hub.cancel(trace_id, reason);
            true
        }
        _ => false,
    }
}
