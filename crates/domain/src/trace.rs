//! The pipeline phase model and the trace event vocabulary.

use serde::{Deserialize, Serialize};

use crate::research::BlockerType;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phases
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The eight fixed pipeline stages, in execution order. The index doubles as
/// the `context.md` subsection number (§0..§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analyzer,
    Reflection,
    Context,
    Planner,
    Executor,
    Coordinator,
    Synthesis,
    Validation,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Analyzer,
        Phase::Reflection,
        Phase::Context,
        Phase::Planner,
        Phase::Executor,
        Phase::Coordinator,
        Phase::Synthesis,
        Phase::Validation,
    ];

    /// Subsection index within `context.md` (§0..§7).
    pub fn index(self) -> usize {
        match self {
            Phase::Analyzer => 0,
            Phase::Reflection => 1,
            Phase::Context => 2,
            Phase::Planner => 3,
            Phase::Executor => 4,
            Phase::Coordinator => 5,
            Phase::Synthesis => 6,
            Phase::Validation => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Analyzer => "analyzer",
            Phase::Reflection => "reflection",
            Phase::Context => "context",
            Phase::Planner => "planner",
            Phase::Executor => "executor",
            Phase::Coordinator => "coordinator",
            Phase::Synthesis => "synthesis",
            Phase::Validation => "validation",
        }
    }

    /// Human title used for the subsection header.
    pub fn title(self) -> &'static str {
        match self {
            Phase::Analyzer => "Query Analysis",
            Phase::Reflection => "Reflection",
            Phase::Context => "Context",
            Phase::Planner => "Plan",
            Phase::Executor => "Execution",
            Phase::Coordinator => "Coordination",
            Phase::Synthesis => "Synthesis",
            Phase::Validation => "Validation",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trace status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Pending,
    Running,
    Complete,
    Cancelled,
    Error,
}

impl TraceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Error)
    }
}

/// Per-event phase status, as carried on every progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Active,
    Completed,
    Error,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trace events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One progress event on a trace. Totally ordered per trace by `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub seq: u64,
    pub phase: Phase,
    pub status: PhaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Confidence in [0, 1], when the phase produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl TraceEvent {
    pub fn active(phase: Phase) -> Self {
        Self {
            seq: 0,
            phase,
            status: PhaseStatus::Active,
            reasoning: None,
            confidence: None,
            duration_ms: None,
            details: None,
        }
    }

    pub fn completed(phase: Phase, confidence: Option<f32>, duration_ms: u64) -> Self {
        Self {
            seq: 0,
            phase,
            status: PhaseStatus::Completed,
            reasoning: None,
            confidence,
            duration_ms: Some(duration_ms),
            details: None,
        }
    }

    pub fn errored(phase: Phase, reason: impl Into<String>) -> Self {
        Self {
            seq: 0,
            phase,
            status: PhaseStatus::Error,
            reasoning: Some(reason.into()),
            confidence: None,
            duration_ms: None,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Feed events (research progress on SSE/WS)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fine-grained research/pipeline progress events carried in the `details`
/// of a [`TraceEvent`] and relayed verbatim to WebSocket consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    ResearchStarted {
        goal: String,
    },
    StrategySelected {
        strategy: String,
    },
    SearchStarted {
        query: String,
    },
    CandidateChecking {
        url: String,
    },
    FetchComplete {
        url: String,
        bytes: usize,
    },
    BlockerDetected {
        url: String,
        blocker_type: BlockerType,
    },
    InterventionNeeded {
        intervention_id: String,
        url: String,
        blocker_type: BlockerType,
    },
    InterventionResolved {
        intervention_id: String,
        resolution: String,
    },
    CandidateAccepted {
        url: String,
        quality: f32,
    },
    CandidateRejected {
        url: String,
        reason: String,
    },
    Progress {
        message: String,
    },
    PhaseStarted {
        phase: Phase,
    },
    PhaseComplete {
        phase: Phase,
    },
    SearchComplete {
        query: String,
        candidates: usize,
    },
    ResearchComplete {
        accepted: usize,
        rejected: usize,
    },
}
