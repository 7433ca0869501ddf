//! Phase 4 — Executor / Research Orchestrator (MIND).
//!
//! Two kinds of work, both dispatched through the tool router: the research
//! loop (when the plan reaches for `web.search`) and direct tool
//! invocations planned by the model for everything else. Policy denials
//! are recorded in `toolresults.md` like any other outcome — synthesis
//! explains the limitation rather than the turn failing.

use serde::Deserialize;
use serde_json::Value;

use pandora_domain::error::Result;
use pandora_domain::plan::{EvidenceLedger, Plan, QueryAnalysis};
use pandora_domain::trace::Phase;
use pandora_providers::Role;
use pandora_turns::Section;

use super::turn_llm_json;
use crate::runtime::research;
use crate::runtime::scheduler::{PhaseResult, TurnCtx};

const INVOCATION_SYSTEM: &str = "You turn a plan into concrete tool calls. \
Respond with JSON: {\"invocations\": [{\"tool\": string, \"args\": object}]}. \
Only use the tools named in the plan. Keep it minimal.";

#[derive(Debug, Deserialize)]
struct InvocationPlan {
    #[serde(default)]
    invocations: Vec<Invocation>,
}

#[derive(Debug, Deserialize)]
struct Invocation {
    tool: String,
    #[serde(default)]
    args: Value,
}

pub struct ExecOutcome {
    pub ledger: EvidenceLedger,
    /// Full research.md body, for the vector index.
    pub research_text: Option<String>,
}

pub async fn run(
    ctx: &TurnCtx,
    plan: &Plan,
    analysis: &QueryAnalysis,
) -> Result<PhaseResult<ExecOutcome>> {
    let wants_research = plan.likely_tools.iter().any(|t| t == "web.search");
    let direct_tools: Vec<&String> = plan
        .likely_tools
        .iter()
        .filter(|t| *t != "web.search" && *t != "web.fetch")
        .collect();

    let mut ledger = EvidenceLedger::default();
    let mut research_text = None;
    let mut summary = Vec::new();

    if wants_research {
        let outcome = research::run_research(ctx, plan, analysis).await?;
        summary.push(format!(
            "research: {} accepted, {} rejected, {} evidence items",
            outcome.accepted,
            outcome.rejected,
            outcome.ledger.len(),
        ));
        research_text = Some(outcome.research_markdown);
        ledger = outcome.ledger;
    }

    if !direct_tools.is_empty() {
        let dispatched = run_direct_tools(ctx, plan, &direct_tools).await?;
        summary.extend(dispatched);
    }

    if summary.is_empty() {
        summary.push("no tool work required by the plan".to_string());
    }
    ctx.append_subsection(Phase::Executor, &summary.join("\n"))?;

    let confidence = if ledger.is_empty() {
        None
    } else {
        let sum: f32 = ledger.items.iter().map(|i| i.confidence).sum();
        Some(sum / ledger.len() as f32)
    };

    let mut result = PhaseResult::new(ExecOutcome {
        ledger,
        research_text,
    });
    if let Some(confidence) = confidence {
        result = result.with_confidence(confidence);
    }
    Ok(result)
}

/// Ask the model for concrete invocations of the plan's non-research tools
/// and dispatch each through the router. Returns one summary line per call.
async fn run_direct_tools(
    ctx: &TurnCtx,
    plan: &Plan,
    tools: &[&String],
) -> Result<Vec<String>> {
    let user = format!(
        "Goal: {}\nApproach: {}\nPlanned tools: {}\nQuery: {}",
        plan.goal,
        plan.approach,
        tools.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "),
        ctx.query,
    );
    let invocation_plan: InvocationPlan =
        turn_llm_json(ctx, Role::Mind, INVOCATION_SYSTEM, &user).await?;

    let policy = ctx.policy();
    let tool_ctx = ctx.tool_ctx();
    let mut lines = Vec::new();

    for invocation in invocation_plan.invocations {
        // The model may only call what the plan named.
        if !tools.iter().any(|t| **t == invocation.tool) {
            lines.push(format!(
                "{}: skipped (not in plan)",
                invocation.tool
            ));
            continue;
        }
        let outcome = ctx
            .state
            .tools
            .execute(&invocation.tool, invocation.args, &tool_ctx, &policy)
            .await;
        ctx.append_section(Section::ToolResults, &outcome.to_record())?;
        match &outcome.result {
            Ok(_) => lines.push(format!(
                "{}: ok ({} bytes)",
                outcome.stamp.tool, outcome.stamp.size
            )),
            Err(e) => {
                if matches!(e, pandora_tools::ToolError::Cancelled) {
                    return Err(pandora_domain::Error::Cancelled);
                }
                lines.push(format!("{}: {e}", outcome.stamp.tool));
            }
        }
    }
    Ok(lines)
}
