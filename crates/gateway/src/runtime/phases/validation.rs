//! Phase 7 — Validation (MIND): approve, revise once, or fail the turn.

use serde::Deserialize;

use pandora_domain::error::Result;
use pandora_domain::plan::ValidationDecision;
use pandora_domain::trace::Phase;
use pandora_providers::Role;

use super::turn_llm_json;
use crate::runtime::scheduler::{PhaseResult, TurnCtx};

const SYSTEM: &str = "You review a drafted answer against the pipeline \
context. Respond with JSON: {\"decision\": \"approve\"} or {\"decision\": \
\"revise\", \"reason\": string} or {\"decision\": \"retry\", \"reason\": \
string}, plus \"quality\": number in [0,1]. Use \"revise\" for fixable \
drafts and \"retry\" only when the whole attempt is unsalvageable.";

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(flatten)]
    decision: ValidationDecision,
    #[serde(default = "default_quality")]
    quality: f32,
}

fn default_quality() -> f32 {
    0.5
}

pub struct Report {
    pub decision: ValidationDecision,
    pub quality: f32,
}

pub async fn run(ctx: &TurnCtx, draft: &str) -> Result<PhaseResult<Report>> {
    let evidence = ctx.read_subsection(Phase::Executor)?;
    let user = format!(
        "Question: {}\n\nDraft answer:\n{draft}\n\nExecution summary:\n{}",
        ctx.query,
        if evidence.trim().is_empty() {
            "(no tool work)"
        } else {
            evidence.trim()
        },
    );

    let reply: Reply =
        turn_llm_json(ctx, Role::Mind, SYSTEM, &user).await?;

    let line = match &reply.decision {
        ValidationDecision::Approve => format!("decision: approve\nquality: {:.2}", reply.quality),
        ValidationDecision::Revise { reason } => {
            format!("decision: revise\nreason: {reason}\nquality: {:.2}", reply.quality)
        }
        ValidationDecision::Retry { reason } => {
            format!("decision: retry\nreason: {reason}\nquality: {:.2}", reply.quality)
        }
    };
    ctx.append_subsection(Phase::Validation, &line)?;

    let quality = reply.quality.clamp(0.0, 1.0);
    Ok(PhaseResult::new(Report {
        decision: reply.decision,
        quality,
    })
    .with_confidence(quality))
}
