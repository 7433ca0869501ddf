//! Phase 0 — Query Analyzer (REFLEX): classify intent, topic, keywords.

use serde::Deserialize;

use pandora_domain::error::Result;
use pandora_domain::plan::{Intent, QueryAnalysis};
use pandora_domain::trace::Phase;
use pandora_providers::Role;

use super::turn_llm_json;
use crate::runtime::scheduler::{PhaseResult, TurnCtx};

const SYSTEM: &str = "You classify user queries for an assistant pipeline. \
Respond with JSON: {\"intent\": \"informational\"|\"commerce\"|\"mixed\"|\
\"conversational\"|\"code\"|\"clarify\", \"topic\": string, \
\"keywords\": [string], \"confidence\": number}.";

#[derive(Debug, Deserialize)]
struct Reply {
    intent: Intent,
    topic: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

pub async fn run(ctx: &TurnCtx) -> Result<PhaseResult<QueryAnalysis>> {
    // Recent-turn topics sharpen classification of follow-ups.
    let recent = ctx
        .state
        .index
        .recent(&ctx.profile, 5)
        .unwrap_or_default();
    let recent_topics: Vec<&str> = recent.iter().map(|e| e.topic.as_str()).collect();

    let user = format!(
        "Query: {}\nRecent topics: {}",
        ctx.query,
        if recent_topics.is_empty() {
            "(none)".to_string()
        } else {
            recent_topics.join("; ")
        }
    );

    let reply: Reply =
        turn_llm_json(ctx, Role::Reflex, SYSTEM, &user).await?;

    ctx.append_subsection(
        Phase::Analyzer,
        &format!(
            "intent: {}\ntopic: {}\nkeywords: {}",
            serde_json::to_string(&reply.intent)?.trim_matches('"'),
            reply.topic,
            reply.keywords.join(", "),
        ),
    )?;

    let analysis = QueryAnalysis {
        intent: reply.intent,
        topic: reply.topic,
        keywords: reply.keywords,
    };
    let mut result = PhaseResult::new(analysis);
    if let Some(confidence) = reply.confidence {
        result = result.with_confidence(confidence);
    }
    Ok(result)
}
