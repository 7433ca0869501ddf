//! Phase 3 — Planner (MIND): produce the plan that routes the rest of the
//! turn.

use serde::Deserialize;

use pandora_domain::error::Result;
use pandora_domain::plan::{Plan, QueryAnalysis};
use pandora_domain::trace::Phase;
use pandora_providers::Role;

use super::turn_llm_json;
use super::context::ContextDigest;
use crate::runtime::scheduler::{PhaseResult, TurnCtx};

const SYSTEM: &str = "You plan how an assistant should answer. Available \
tools: web.search, web.fetch, fs.read, fs.write, fs.append, fs.list. \
Respond with JSON: {\"goal\": string, \"pattern\": string?, \"approach\": \
string, \"likely_tools\": [string], \"route\": \"executor\"|\"synthesis\"|\
\"clarify\", \"confidence\": number}. Route \"synthesis\" when the answer \
needs no tools; \"executor\" when research or tool work is required.";

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(flatten)]
    plan: Plan,
    #[serde(default)]
    confidence: Option<f32>,
}

pub async fn run(
    ctx: &TurnCtx,
    analysis: &QueryAnalysis,
    digest: &ContextDigest,
) -> Result<PhaseResult<Plan>> {
    let user = format!(
        "Query: {}\nIntent: {}\nTopic: {}\nKeywords: {}\nContext digest: {}",
        ctx.query,
        serde_json::to_string(&analysis.intent)?.trim_matches('"'),
        analysis.topic,
        analysis.keywords.join(", "),
        digest.digest,
    );

    let reply: Reply =
        turn_llm_json(ctx, Role::Mind, SYSTEM, &user).await?;

    ctx.append_subsection(
        Phase::Planner,
        &format!(
            "goal: {}\napproach: {}\nroute: {}\nlikely_tools: {}",
            reply.plan.goal,
            reply.plan.approach,
            serde_json::to_string(&reply.plan.route)?.trim_matches('"'),
            reply.plan.likely_tools.join(", "),
        ),
    )?;

    let mut result = PhaseResult::new(reply.plan);
    if let Some(confidence) = reply.confidence {
        result = result.with_confidence(confidence);
    }
    Ok(result)
}
