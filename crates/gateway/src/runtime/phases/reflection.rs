//! Phase 1 — Reflection (REFLEX): proceed, or short-circuit with a
//! clarifying question.

use serde::Deserialize;

use pandora_domain::error::Result;
use pandora_domain::plan::{QueryAnalysis, ReflectionDecision};
use pandora_domain::trace::Phase;
use pandora_providers::Role;

use super::turn_llm_json;
use crate::runtime::scheduler::{PhaseResult, TurnCtx};

const SYSTEM: &str = "You gate an assistant pipeline. Decide whether the \
query is answerable as-is or needs one clarifying question first. Respond \
with JSON: {\"decision\": \"proceed\"} or {\"decision\": \"clarify\", \
\"question\": string}. Include \"confidence\": number.";

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(flatten)]
    decision: ReflectionDecision,
    #[serde(default)]
    confidence: Option<f32>,
}

pub async fn run(ctx: &TurnCtx, analysis: &QueryAnalysis) -> Result<PhaseResult<ReflectionDecision>> {
    let user = format!(
        "Query: {}\nIntent: {}\nTopic: {}",
        ctx.query,
        serde_json::to_string(&analysis.intent)?.trim_matches('"'),
        analysis.topic,
    );

    let reply: Reply =
        turn_llm_json(ctx, Role::Reflex, SYSTEM, &user).await?;

    let line = match &reply.decision {
        ReflectionDecision::Proceed => "decision: proceed".to_string(),
        ReflectionDecision::Clarify { question } => {
            format!("decision: clarify\nquestion: {question}")
        }
    };
    ctx.append_subsection(Phase::Reflection, &line)?;

    let mut result = PhaseResult::new(reply.decision);
    if let Some(confidence) = reply.confidence {
        result = result.with_confidence(confidence);
    }
    Ok(result)
}
