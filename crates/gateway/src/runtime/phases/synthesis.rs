//! Phase 6 — Synthesis (VOICE): the final user-facing text.
//!
//! Reads `context.md` §0–§5 plus the evidence ledger. First-pass-only
//! claims must be attributed to their source; citations beyond the ledger
//! are off limits.

use pandora_domain::error::Result;
use pandora_domain::plan::{EvidenceLedger, QueryAnalysis, VerificationStatus};
use pandora_domain::trace::Phase;
use pandora_providers::Role;

use super::turn_llm_text;
use crate::runtime::scheduler::{PhaseResult, TurnCtx};

const SYSTEM: &str = "You write the final answer for the user. Ground every \
factual claim in the evidence ledger when one is provided; cite the source \
URL inline for claims marked phase1_only and do not invent citations. Be \
direct and complete.";

/// The fixed template used by the clarify fast path. No model call.
pub fn clarify_template(question: &str) -> String {
    format!(
        "Before I can answer properly, I need one detail from you: {}",
        question.trim()
    )
}

/// Record a fixed response (clarify fast path) as the synthesis output.
pub async fn run_fixed(ctx: &TurnCtx, text: &str) -> Result<PhaseResult<()>> {
    ctx.append_subsection(Phase::Synthesis, text)?;
    Ok(PhaseResult::new(()).with_reasoning("clarify fast path"))
}

pub async fn run(
    ctx: &TurnCtx,
    analysis: &QueryAnalysis,
    ledger: &EvidenceLedger,
    revise_reason: Option<&str>,
) -> Result<PhaseResult<String>> {
    // §0–§5 are the synthesis inputs; §6/§7 do not exist yet.
    let mut sections = String::new();
    for phase in [
        Phase::Analyzer,
        Phase::Reflection,
        Phase::Context,
        Phase::Planner,
        Phase::Executor,
        Phase::Coordinator,
    ] {
        let body = ctx.read_subsection(phase)?;
        if !body.trim().is_empty() {
            sections.push_str(&format!("## {}\n{}\n\n", phase.title(), body.trim()));
        }
    }

    let mut user = format!(
        "Question: {}\nTopic: {}\n\nPipeline context:\n{sections}",
        ctx.query, analysis.topic
    );
    if !ledger.is_empty() {
        user.push_str("\nEvidence ledger:\n");
        user.push_str(&ledger.to_markdown());
        let unverified: Vec<&str> = ledger.unverified().map(|i| i.url.as_str()).collect();
        if !unverified.is_empty() {
            user.push_str(&format!(
                "\nClaims from these sources are first-pass only; attribute them \
                 explicitly: {}\n",
                unverified.join(", ")
            ));
        }
    }
    if let Some(reason) = revise_reason {
        user.push_str(&format!(
            "\nA previous draft was rejected by validation for this reason; fix it: {reason}\n"
        ));
    }

    let text = turn_llm_text(ctx, Role::Voice, SYSTEM, &user).await?;
    ctx.append_subsection(Phase::Synthesis, &text)?;

    // Confidence follows how much of the ledger survived verification.
    let confidence = if ledger.is_empty() {
        None
    } else {
        let verified = ledger
            .items
            .iter()
            .filter(|i| i.verification_status == VerificationStatus::PdpVerified)
            .count();
        Some(0.5 + 0.5 * verified as f32 / ledger.len() as f32)
    };

    let mut result = PhaseResult::new(text);
    if let Some(confidence) = confidence {
        result = result.with_confidence(confidence);
    }
    if revise_reason.is_some() {
        result = result.with_reasoning("revised per validation feedback");
    }
    Ok(result)
}
