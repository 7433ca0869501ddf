//! Phase 2 — Context Gatherer (MIND): recall prior turns from the indexes
//! and produce a context digest.
//!
//! Index reads are best-effort; an empty or failing index yields an empty
//! digest, never a phase error.

use serde::Deserialize;

use pandora_domain::error::Result;
use pandora_domain::plan::QueryAnalysis;
use pandora_domain::trace::Phase;
use pandora_providers::Role;

use super::turn_llm_json;
use crate::runtime::scheduler::{PhaseResult, TurnCtx};

const SYSTEM: &str = "You compress prior-turn summaries into a short \
context digest for answering a new query. Respond with JSON: \
{\"digest\": string, \"citations\": [string]} where citations are the turn \
numbers actually relevant.";

#[derive(Debug, Clone, Default)]
pub struct ContextDigest {
    pub digest: String,
    /// Prior-turn citations as relative paths (`../<turn_id>/context.md`).
    pub citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    digest: String,
    #[serde(default)]
    citations: Vec<String>,
}

pub async fn run(ctx: &TurnCtx, analysis: &QueryAnalysis) -> Result<PhaseResult<ContextDigest>> {
    let recent = ctx
        .state
        .index
        .recent(&ctx.profile, 8)
        .unwrap_or_default();

    let digest = if recent.is_empty() {
        ContextDigest {
            digest: "No prior context for this profile.".to_string(),
            citations: Vec::new(),
        }
    } else {
        let listing: String = recent
            .iter()
            .map(|e| {
                format!(
                    "- turn {} [{}]: {}\n",
                    e.turn_number,
                    serde_json::to_string(&e.intent)
                        .unwrap_or_default()
                        .trim_matches('"'),
                    e.topic
                )
            })
            .collect();
        let user = format!(
            "New query: {}\nTopic: {}\nPrior turns:\n{listing}",
            ctx.query, analysis.topic
        );
        let reply: Reply =
            turn_llm_json(ctx, Role::Mind, SYSTEM, &user).await?;

        // Cross-section references use relative paths within the profile.
        let citations = reply
            .citations
            .iter()
            .map(|turn| format!("../{turn}/context.md"))
            .collect();
        ContextDigest {
            digest: reply.digest,
            citations,
        }
    };

    let mut body = digest.digest.clone();
    if !digest.citations.is_empty() {
        body.push_str("\ncitations: ");
        body.push_str(&digest.citations.join(", "));
    }
    ctx.append_subsection(Phase::Context, &body)?;

    Ok(PhaseResult::new(digest))
}
