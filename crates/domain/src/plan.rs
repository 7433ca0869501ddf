//! Phase decision types: query analysis, reflection, plans, validation, and
//! the evidence ledger produced by research.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query analysis (phase 0)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Informational,
    Commerce,
    Mixed,
    Conversational,
    Code,
    Clarify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub intent: Intent,
    pub topic: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reflection (phase 1)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReflectionDecision {
    Proceed,
    Clarify { question: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan (phase 3)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Executor,
    Synthesis,
    Clarify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub approach: String,
    #[serde(default)]
    pub likely_tools: Vec<String>,
    pub route: Route,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation (phase 7)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ValidationDecision {
    Approve,
    Revise { reason: String },
    Retry { reason: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Evidence ledger (phase 5 output)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Retailer,
    Vendor,
    News,
    Reference,
    Blog,
    Forum,
    Unknown,
}

/// Whether a claim was verified beyond the first-pass fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Phase1Only,
    PdpVerified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub claim: String,
    pub url: String,
    pub source_type: SourceType,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    pub verification_status: VerificationStatus,
}

/// The structured list of claims+sources produced by the Executor and
/// consumed by Synthesis. Synthesis must attribute `phase1_only` claims to
/// their source and must not fabricate citations beyond this list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceLedger {
    pub items: Vec<EvidenceItem>,
}

impl EvidenceLedger {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Items that were only seen in the first fetch pass and therefore need
    /// explicit attribution in the synthesized text.
    pub fn unverified(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.items
            .iter()
            .filter(|i| i.verification_status == VerificationStatus::Phase1Only)
    }

    /// Mark every item for `url` as vendor-verified.
    pub fn mark_verified(&mut self, url: &str) {
        for item in self.items.iter_mut().filter(|i| i.url == url) {
            item.verification_status = VerificationStatus::PdpVerified;
        }
    }

    /// Render the ledger as the markdown table written to `research.md`.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from(
            "| claim | url | source | confidence | verification |\n|---|---|---|---|---|\n",
        );
        for item in &self.items {
            let verification = match item.verification_status {
                VerificationStatus::Phase1Only => "phase1_only",
                VerificationStatus::PdpVerified => "pdp_verified",
            };
            out.push_str(&format!(
                "| {} | {} | {:?} | {:.2} | {} |\n",
                item.claim.replace('|', "\\|"),
                item.url,
                item.source_type,
                item.confidence,
                verification,
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(url: &str, status: VerificationStatus) -> EvidenceItem {
        EvidenceItem {
            claim: "price is $99".into(),
            url: url.into(),
            source_type: SourceType::Retailer,
            confidence: 0.8,
            quote: None,
            verification_status: status,
        }
    }

    #[test]
    fn intent_wire_names() {
        assert_eq!(
            serde_json::to_string(&Intent::Informational).unwrap(),
            "\"informational\""
        );
        assert_eq!(serde_json::to_string(&Intent::Commerce).unwrap(), "\"commerce\"");
    }

    #[test]
    fn reflection_decision_round_trip() {
        let d: ReflectionDecision =
            serde_json::from_str(r#"{"decision":"clarify","question":"which model?"}"#).unwrap();
        match d {
            ReflectionDecision::Clarify { question } => assert_eq!(question, "which model?"),
            _ => panic!("expected clarify"),
        }

        let p: ReflectionDecision = serde_json::from_str(r#"{"decision":"proceed"}"#).unwrap();
        assert!(matches!(p, ReflectionDecision::Proceed));
    }

    #[test]
    fn plan_parses_with_defaults() {
        let plan: Plan = serde_json::from_str(
            r#"{"goal":"answer","approach":"direct","route":"synthesis"}"#,
        )
        .unwrap();
        assert_eq!(plan.route, Route::Synthesis);
        assert!(plan.likely_tools.is_empty());
        assert!(plan.pattern.is_none());
    }

    #[test]
    fn ledger_mark_verified_targets_url() {
        let mut ledger = EvidenceLedger {
            items: vec![
                item("https://a.example", VerificationStatus::Phase1Only),
                item("https://b.example", VerificationStatus::Phase1Only),
            ],
        };
        ledger.mark_verified("https://a.example");
        assert_eq!(ledger.unverified().count(), 1);
        assert_eq!(
            ledger.unverified().next().unwrap().url,
            "https://b.example"
        );
    }

    #[test]
    fn ledger_markdown_escapes_pipes() {
        let ledger = EvidenceLedger {
            items: vec![EvidenceItem {
                claim: "a|b".into(),
                url: "https://x.example".into(),
                source_type: SourceType::News,
                confidence: 0.5,
                quote: None,
                verification_status: VerificationStatus::PdpVerified,
            }],
        };
        let md = ledger.to_markdown();
        assert!(md.contains("a\\|b"));
        assert!(md.contains("pdp_verified"));
    }
}
