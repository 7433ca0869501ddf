//! The research loop driven by the Executor phase.
//!
//! query-plan → search → per-candidate fetch (bounded by the browser pool)
//! → blocker detection → intervention handoff for human-only blockers →
//! extraction → quality scoring → acceptance. Stops when the coverage
//! target is met or `max_candidates` is exhausted. Every fetch goes through
//! the tool router so raw outputs land in `toolresults.md` and policy
//! applies uniformly.

use std::collections::HashSet;

use serde_json::Value;

use pandora_domain::error::{Error, Result};
use pandora_domain::plan::{EvidenceItem, EvidenceLedger, Plan, QueryAnalysis, VerificationStatus};
use pandora_domain::research::{BlockerType, Candidate, QualityScore};
use pandora_domain::trace::{FeedEvent, Phase};
use pandora_tools::web::classify_source;
use pandora_tools::ToolError;
use pandora_turns::Section;

use crate::runtime::scheduler::TurnCtx;

pub struct ResearchOutcome {
    pub ledger: EvidenceLedger,
    pub accepted: usize,
    pub rejected: usize,
    /// Body written to `research.md`.
    pub research_markdown: String,
}

pub async fn run_research(
    ctx: &TurnCtx,
    plan: &Plan,
    analysis: &QueryAnalysis,
) -> Result<ResearchOutcome> {
    let config = &ctx.state.config.research;
    let policy = ctx.policy();
    let tool_ctx = ctx.tool_ctx();

    ctx.feed(
        Phase::Executor,
        FeedEvent::ResearchStarted {
            goal: plan.goal.clone(),
        },
    );
    ctx.feed(
        Phase::Executor,
        FeedEvent::StrategySelected {
            strategy: plan
                .pattern
                .clone()
                .unwrap_or_else(|| "breadth-first-search".to_string()),
        },
    );

    // ── Query plan ───────────────────────────────────────────────────
    let queries = build_queries(plan, analysis, config.max_queries);

    // ── Search ───────────────────────────────────────────────────────
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut seen_urls: HashSet<String> = HashSet::new();
    for query in &queries {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        ctx.feed(
            Phase::Executor,
            FeedEvent::SearchStarted {
                query: query.clone(),
            },
        );
        let outcome = ctx
            .state
            .tools
            .execute(
                "web.search",
                serde_json::json!({"query": query, "limit": config.max_candidates}),
                &tool_ctx,
                &policy,
            )
            .await;
        ctx.append_section(Section::ToolResults, &outcome.to_record())?;

        let found = match outcome.result {
            Ok(value) => parse_candidates(&value),
            Err(ToolError::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                tracing::warn!(query, error = %e, "search failed, continuing with remaining queries");
                Vec::new()
            }
        };
        let mut fresh = 0;
        for candidate in found {
            if seen_urls.insert(candidate.url.clone()) {
                candidates.push(candidate);
                fresh += 1;
            }
        }
        ctx.feed(
            Phase::Executor,
            FeedEvent::SearchComplete {
                query: query.clone(),
                candidates: fresh,
            },
        );
        if candidates.len() >= config.max_candidates {
            break;
        }
    }
    candidates.truncate(config.max_candidates);

    // ── Fetch / score loop ───────────────────────────────────────────
    let mut ledger = EvidenceLedger::default();
    let mut accepted_sources: Vec<(Candidate, QualityScore)> = Vec::new();
    let mut rejected = 0usize;
    let mut quality_sum = 0f32;

    for candidate in candidates {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Coverage check before spending another fetch.
        let accepted = accepted_sources.len();
        if accepted >= config.min_sources
            && quality_sum / accepted as f32 >= config.quality_target
        {
            break;
        }

        ctx.feed(
            Phase::Executor,
            FeedEvent::CandidateChecking {
                url: candidate.url.clone(),
            },
        );

        // One browser session per active candidate.
        let _session = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            permit = ctx.state.browser_pool.acquire() => permit?,
        };

        match fetch_candidate(ctx, &candidate.url).await? {
            Fetched::Content(content) => {
                match score_candidate(&candidate, &content, analysis) {
                    Some((score, items)) => {
                        ctx.feed(
                            Phase::Executor,
                            FeedEvent::CandidateAccepted {
                                url: candidate.url.clone(),
                                quality: score.overall(),
                            },
                        );
                        quality_sum += score.overall();
                        ledger.items.extend(items);
                        accepted_sources.push((candidate, score));
                    }
                    None => {
                        rejected += 1;
                        ctx.feed(
                            Phase::Executor,
                            FeedEvent::CandidateRejected {
                                url: candidate.url.clone(),
                                reason: "below quality threshold".to_string(),
                            },
                        );
                    }
                }
            }
            Fetched::Rejected(reason) => {
                rejected += 1;
                ctx.feed(
                    Phase::Executor,
                    FeedEvent::CandidateRejected {
                        url: candidate.url.clone(),
                        reason,
                    },
                );
            }
        }
    }

    ctx.feed(
        Phase::Executor,
        FeedEvent::ResearchComplete {
            accepted: accepted_sources.len(),
            rejected,
        },
    );

    // ── research.md ──────────────────────────────────────────────────
    let markdown = render_research(plan, &accepted_sources, &ledger);
    ctx.append_section(Section::Research, &markdown)?;

    Ok(ResearchOutcome {
        accepted: accepted_sources.len(),
        rejected,
        ledger,
        research_markdown: markdown,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fetch with blocker handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Fetched {
    Content(String),
    Rejected(String),
}

async fn fetch_candidate(ctx: &TurnCtx, url: &str) -> Result<Fetched> {
    let (blocker_type, screenshot_path, cdp_url) = match fetch_once(ctx, url).await? {
        FetchReply::Content(content) => return Ok(Fetched::Content(content)),
        FetchReply::Failed(reason) => return Ok(Fetched::Rejected(reason)),
        FetchReply::Blocked {
            blocker_type,
            screenshot_path,
            cdp_url,
        } => (blocker_type, screenshot_path, cdp_url),
    };

    ctx.feed(
        Phase::Executor,
        FeedEvent::BlockerDetected {
            url: url.to_string(),
            blocker_type,
        },
    );

    if !blocker_type.needs_human() {
        return Ok(Fetched::Rejected(format!(
            "blocked ({})",
            blocker_kind(blocker_type)
        )));
    }

    // Human handoff: suspend on the broker until resolved/expired.
    let intervention = ctx.state.interventions.request(
        &ctx.trace_id,
        &ctx.profile,
        url,
        blocker_type,
        screenshot_path,
        cdp_url,
    );
    ctx.feed(
        Phase::Executor,
        FeedEvent::InterventionNeeded {
            intervention_id: intervention.intervention_id.clone(),
            url: url.to_string(),
            blocker_type,
        },
    );

    let resolution = ctx
        .state
        .interventions
        .await_resolution(&intervention.intervention_id, &ctx.cancel)
        .await?;
    ctx.feed(
        Phase::Executor,
        FeedEvent::InterventionResolved {
            intervention_id: intervention.intervention_id.clone(),
            resolution: format!("{resolution:?}").to_lowercase(),
        },
    );

    match resolution {
        pandora_domain::research::InterventionResolution::Skipped => {
            Ok(Fetched::Rejected("intervention skipped".to_string()))
        }
        pandora_domain::research::InterventionResolution::Ok => {
            // The human cleared the blocker; one more attempt.
            match fetch_once(ctx, url).await? {
                FetchReply::Content(content) => Ok(Fetched::Content(content)),
                FetchReply::Blocked { blocker_type, .. } => Ok(Fetched::Rejected(format!(
                    "still blocked after intervention ({})",
                    blocker_kind(blocker_type)
                ))),
                FetchReply::Failed(reason) => Ok(Fetched::Rejected(reason)),
            }
        }
    }
}

enum FetchReply {
    Content(String),
    Blocked {
        blocker_type: BlockerType,
        screenshot_path: Option<String>,
        cdp_url: Option<String>,
    },
    Failed(String),
}

async fn fetch_once(ctx: &TurnCtx, url: &str) -> Result<FetchReply> {
    let outcome = ctx
        .state
        .tools
        .execute(
            "web.fetch",
            serde_json::json!({"url": url}),
            &ctx.tool_ctx(),
            &ctx.policy(),
        )
        .await;
    ctx.append_section(Section::ToolResults, &outcome.to_record())?;

    match outcome.result {
        Err(ToolError::Cancelled) => Err(Error::Cancelled),
        Err(e) => Ok(FetchReply::Failed(e.to_string())),
        Ok(value) => {
            if value.get("status").and_then(Value::as_str) == Some("blocked") {
                let blocker_type = value
                    .get("blocker_type")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or(BlockerType::UnknownBlocker);
                Ok(FetchReply::Blocked {
                    blocker_type,
                    screenshot_path: value
                        .get("screenshot_path")
                        .and_then(Value::as_str)
                        .map(String::from),
                    cdp_url: value.get("cdp_url").and_then(Value::as_str).map(String::from),
                })
            } else {
                let bytes = value.get("bytes").and_then(Value::as_u64).unwrap_or(0) as usize;
                ctx.feed(
                    Phase::Executor,
                    FeedEvent::FetchComplete {
                        url: url.to_string(),
                        bytes,
                    },
                );
                Ok(FetchReply::Content(
                    value
                        .get("content")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                ))
            }
        }
    }
}

fn blocker_kind(blocker_type: BlockerType) -> String {
    serde_json::to_string(&blocker_type)
        .unwrap_or_default()
        .trim_matches('"')
        .to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scoring & extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_queries(plan: &Plan, analysis: &QueryAnalysis, max_queries: usize) -> Vec<String> {
    let mut queries = Vec::new();
    if !analysis.keywords.is_empty() {
        queries.push(format!(
            "{} {}",
            analysis.topic,
            analysis.keywords.join(" ")
        ));
    }
    queries.push(plan.goal.clone());
    queries.push(analysis.topic.clone());
    queries.dedup();
    queries.truncate(max_queries.max(1));
    queries
}

/// Keyword-overlap relevance with a source-type authority prior. Returns
/// the score and extracted evidence, or `None` when the page is rejected.
fn score_candidate(
    candidate: &Candidate,
    content: &str,
    analysis: &QueryAnalysis,
) -> Option<(QualityScore, Vec<EvidenceItem>)> {
    let lowered = content.to_lowercase();
    let keywords: Vec<String> = analysis
        .keywords
        .iter()
        .map(|k| k.to_lowercase())
        .collect();

    let relevance = if keywords.is_empty() {
        if lowered.contains(&analysis.topic.to_lowercase()) {
            0.6
        } else {
            0.2
        }
    } else {
        let hits = keywords.iter().filter(|k| lowered.contains(*k)).count();
        hits as f32 / keywords.len() as f32
    };

    let source_type = classify_source(&candidate.url);
    let authority = match source_type {
        pandora_domain::plan::SourceType::Retailer => 0.9,
        pandora_domain::plan::SourceType::Vendor => 0.9,
        pandora_domain::plan::SourceType::Reference => 0.9,
        pandora_domain::plan::SourceType::News => 0.7,
        pandora_domain::plan::SourceType::Blog => 0.5,
        pandora_domain::plan::SourceType::Forum => 0.4,
        pandora_domain::plan::SourceType::Unknown => 0.5,
    };
    let score = QualityScore {
        relevance,
        authority,
        freshness: 0.5,
    };

    if relevance == 0.0 || score.overall() < 0.4 {
        return None;
    }

    let items = extract_claims(candidate, content, &keywords, source_type, score.overall());
    if items.is_empty() {
        return None;
    }
    Some((score, items))
}

/// Pull sentences that mention a keyword as claims, quoted verbatim.
fn extract_claims(
    candidate: &Candidate,
    content: &str,
    keywords: &[String],
    source_type: pandora_domain::plan::SourceType,
    confidence: f32,
) -> Vec<EvidenceItem> {
    let mut items = Vec::new();
    for sentence in content.split(['.', '\n']) {
        let trimmed = sentence.trim();
        if trimmed.len() < 12 || trimmed.len() > 400 {
            continue;
        }
        let lowered = trimmed.to_lowercase();
        let relevant = if keywords.is_empty() {
            true
        } else {
            keywords.iter().any(|k| lowered.contains(k))
        };
        if relevant {
            items.push(EvidenceItem {
                claim: trimmed.to_string(),
                url: candidate.url.clone(),
                source_type,
                confidence,
                quote: Some(trimmed.to_string()),
                verification_status: VerificationStatus::Phase1Only,
            });
        }
        if items.len() >= 3 {
            break;
        }
    }
    items
}

fn parse_candidates(value: &Value) -> Vec<Candidate> {
    value
        .get("candidates")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|c| serde_json::from_value(c.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn render_research(
    plan: &Plan,
    accepted: &[(Candidate, QualityScore)],
    ledger: &EvidenceLedger,
) -> String {
    let mut out = format!("# Research\n\ngoal: {}\n\n## Sources\n", plan.goal);
    for (candidate, score) in accepted {
        out.push_str(&format!(
            "- [{}]({}) quality {:.2}\n",
            candidate.title,
            candidate.url,
            score.overall(),
        ));
    }
    out.push_str("\n## Evidence ledger\n\n");
    out.push_str(&ledger.to_markdown());
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
