use crate::trace::Phase;

/// Which budget a timeout blew through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Phase,
    Tool,
    Llm,
    Intervention,
    Permission,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Phase => "phase",
            Self::Tool => "tool",
            Self::Llm => "llm",
            Self::Intervention => "intervention",
            Self::Permission => "permission",
        };
        f.write_str(s)
    }
}

/// Shared error type used across all Pandora crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("phase {phase} failed: {reason}")]
    PhaseFailed { phase: Phase, reason: String },

    #[error("timeout: {0}")]
    Timeout(TimeoutKind),

    #[error("cancelled")]
    Cancelled,

    #[error("LLM: {0}")]
    Llm(String),

    #[error("store: {0}")]
    Store(String),

    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Stable wire name for the error kind, as surfaced in job records and
    /// the `/v1/response` error payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::PolicyDenied(_) => "policy_denied",
            Self::PhaseFailed { .. } => "phase_failed",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Io(_) | Self::Store(_) => "store",
            Self::Llm(_) => "llm",
            Self::Http(_) => "http",
            Self::Json(_) => "bad_request",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
