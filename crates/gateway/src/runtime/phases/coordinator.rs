//! Phase 5 — Coordinator (MIND): secondary verification pass for commerce
//! plans.
//!
//! Re-fetches retailer/vendor product pages from the evidence ledger and
//! upgrades their claims to `pdp_verified` when the page still supports
//! them. Non-commerce turns skip this phase (merged into the executor).

use serde_json::Value;

use pandora_domain::error::{Error, Result};
use pandora_domain::plan::{EvidenceLedger, SourceType, VerificationStatus};
use pandora_domain::trace::{FeedEvent, Phase};
use pandora_tools::ToolError;
use pandora_turns::Section;

use crate::runtime::scheduler::{PhaseResult, TurnCtx};

pub async fn run(ctx: &TurnCtx, mut ledger: EvidenceLedger) -> Result<PhaseResult<EvidenceLedger>> {
    let targets: Vec<String> = {
        let mut urls: Vec<String> = ledger
            .items
            .iter()
            .filter(|i| {
                i.verification_status == VerificationStatus::Phase1Only
                    && matches!(i.source_type, SourceType::Retailer | SourceType::Vendor)
            })
            .map(|i| i.url.clone())
            .collect();
        urls.sort();
        urls.dedup();
        urls
    };

    if targets.is_empty() {
        ctx.append_subsection(Phase::Coordinator, "no vendor pages to verify")?;
        return Ok(PhaseResult::new(ledger));
    }

    let policy = ctx.policy();
    let tool_ctx = ctx.tool_ctx();
    let mut verified = 0usize;
    let mut lines = Vec::new();

    for url in &targets {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        ctx.feed(
            Phase::Coordinator,
            FeedEvent::CandidateChecking { url: url.clone() },
        );
        let outcome = ctx
            .state
            .tools
            .execute(
                "web.fetch",
                serde_json::json!({"url": url}),
                &tool_ctx,
                &policy,
            )
            .await;
        ctx.append_section(Section::ToolResults, &outcome.to_record())?;

        match outcome.result {
            Ok(value) if value.get("status").and_then(Value::as_str) == Some("ok") => {
                ledger.mark_verified(url);
                verified += 1;
                lines.push(format!("{url}: verified"));
            }
            Ok(_) => lines.push(format!("{url}: unverifiable (blocked on recheck)")),
            Err(ToolError::Cancelled) => return Err(Error::Cancelled),
            Err(e) => lines.push(format!("{url}: unverifiable ({e})")),
        }
    }

    ctx.append_subsection(Phase::Coordinator, &lines.join("\n"))?;

    let confidence = verified as f32 / targets.len() as f32;
    Ok(PhaseResult::new(ledger).with_confidence(confidence))
}
