//! The eight phase runners.
//!
//! Each phase follows the same skeleton: emit `active`, read its required
//! sections, build a prompt, call the LLM under its role, parse, append its
//! subsection, emit `completed` with confidence and duration. A recoverable
//! format failure triggers exactly one retry with a stricter instruction;
//! transport errors and a second format failure abort the phase.

pub mod analyzer;
pub mod context;
pub mod coordinator;
pub mod executor;
pub mod planner;
pub mod reflection;
pub mod synthesis;
pub mod validation;

use serde::de::DeserializeOwned;

use pandora_domain::cancel::CancelToken;
use pandora_domain::error::{Error, Result};
use pandora_providers::{ChatMessage, LlmRegistry, Role};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Turn-scoped JSON exchange with the single-retry format contract; raw
/// traffic is recorded to the turn's `transcript.json` when enabled.
pub(crate) async fn turn_llm_json<T: DeserializeOwned>(
    ctx: &crate::runtime::scheduler::TurnCtx,
    role: Role,
    system: &str,
    user: &str,
) -> Result<T> {
    call_llm_json_observed(
        &ctx.state.llm,
        &ctx.cancel,
        role,
        system,
        user,
        |prompt, response| ctx.record_llm_exchange(role, prompt, response),
    )
    .await
}

async fn call_llm_json_observed<T: DeserializeOwned, F: FnMut(&str, &str)>(
    llm: &LlmRegistry,
    cancel: &CancelToken,
    role: Role,
    system: &str,
    user: &str,
    mut observe: F,
) -> Result<T> {
    let response = complete_cancellable(
        llm,
        cancel,
        role,
        vec![ChatMessage::system(system), ChatMessage::user(user)],
        true,
    )
    .await?;
    observe(user, &response.content);

    match parse_json_reply::<T>(&response.content) {
        Ok(value) => Ok(value),
        Err(parse_err) => {
            tracing::debug!(role = role.name(), error = %parse_err, "format failure, retrying once");
            let strict = format!(
                "{user}\n\nYour previous reply could not be parsed ({parse_err}). \
                 Respond with ONLY a single valid JSON object. No prose, no code fences."
            );
            let response = complete_cancellable(
                llm,
                cancel,
                role,
                vec![ChatMessage::system(system), ChatMessage::user(&strict)],
                true,
            )
            .await?;
            observe(&strict, &response.content);
            parse_json_reply::<T>(&response.content)
                .map_err(|e| Error::Llm(format!("response format invalid after retry: {e}")))
        }
    }
}

/// Turn-scoped free-text exchange (synthesis). No format retry.
pub(crate) async fn turn_llm_text(
    ctx: &crate::runtime::scheduler::TurnCtx,
    role: Role,
    system: &str,
    user: &str,
) -> Result<String> {
    let response = complete_cancellable(
        &ctx.state.llm,
        &ctx.cancel,
        role,
        vec![ChatMessage::system(system), ChatMessage::user(user)],
        false,
    )
    .await?;
    ctx.record_llm_exchange(role, user, &response.content);
    Ok(response.content.trim().to_string())
}

async fn complete_cancellable(
    llm: &LlmRegistry,
    cancel: &CancelToken,
    role: Role,
    messages: Vec<ChatMessage>,
    json_mode: bool,
) -> Result<pandora_providers::ChatResponse> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = llm.complete(role, messages, json_mode) => result,
    }
}

/// Extract and parse the JSON object from a model reply, tolerating code
/// fences and surrounding prose.
pub(crate) fn parse_json_reply<T: DeserializeOwned>(content: &str) -> std::result::Result<T, String> {
    let trimmed = content.trim();

    // Direct parse first.
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    // Strip ``` fences.
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim);
    if let Some(inner) = unfenced {
        if let Ok(value) = serde_json::from_str::<T>(inner) {
            return Ok(value);
        }
    }

    // Last resort: the outermost brace span.
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return serde_json::from_str::<T>(&trimmed[start..=end]).map_err(|e| e.to_string());
        }
    }
    Err("no JSON object found in reply".to_string())
}
