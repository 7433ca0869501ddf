//! Research domain types: blockers, candidates, quality scoring, and
//! intervention records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::SourceType;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blockers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerType {
    CaptchaRecaptcha,
    CaptchaHcaptcha,
    CaptchaCloudflare,
    CaptchaGeneric,
    LoginRequired,
    RateLimit,
    BotDetection,
    ExtractionFailed,
    UnknownBlocker,
}

impl BlockerType {
    /// Whether the blocker can only be cleared by a human (CAPTCHA, login)
    /// as opposed to retried or skipped automatically.
    pub fn needs_human(self) -> bool {
        matches!(
            self,
            Self::CaptchaRecaptcha
                | Self::CaptchaHcaptcha
                | Self::CaptchaCloudflare
                | Self::CaptchaGeneric
                | Self::LoginRequired
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Candidates & quality
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A search hit queued for fetching during the research loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub source_type: SourceType,
}

/// Quality of an extracted page, each axis in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityScore {
    pub relevance: f32,
    pub authority: f32,
    pub freshness: f32,
}

impl QualityScore {
    /// Weighted overall score: relevance dominates.
    pub fn overall(self) -> f32 {
        (self.relevance * 0.5 + self.authority * 0.3 + self.freshness * 0.2).clamp(0.0, 1.0)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interventions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionStatus {
    Pending,
    Resolved,
    Skipped,
    Expired,
}

impl InterventionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionResolution {
    Ok,
    Skipped,
}

/// A pending or settled human-assist request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervention {
    pub intervention_id: String,
    pub trace_id: String,
    pub profile: String,
    pub url: String,
    pub blocker_type: BlockerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdp_url: Option<String>,
    pub status: InterventionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<InterventionResolution>,
}
