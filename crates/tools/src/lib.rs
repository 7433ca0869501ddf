//! Tool layer: the `Tool` trait, the swappable registry, the policy-gated
//! router, filesystem tools, and the web research collaborator seams.

pub mod file_ops;
pub mod paths;
pub mod registry;
pub mod router;
pub mod web;

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use pandora_domain::cancel::CancelToken;

pub use registry::ToolRegistry;
pub use router::{ConfirmGate, DenyAllGate, ToolError, ToolOutcome, ToolRouter, ToolStamp};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Call-site context threaded into every tool invocation.
#[derive(Clone)]
pub struct ToolCtx {
    pub profile: String,
    pub trace_id: String,
    pub cancel: CancelToken,
}

impl ToolCtx {
    pub fn new(profile: impl Into<String>, trace_id: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            profile: profile.into(),
            trace_id: trace_id.into(),
            cancel,
        }
    }
}

/// A named tool dispatchable by the router.
///
/// Implementations return `Err(String)` for their own failures; the router
/// owns timeouts, cancellation, and policy, and maps everything into the
/// [`ToolError`] taxonomy.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Filesystem paths this call would write. Non-empty targets route the
    /// call through the write-policy gate before execution.
    fn write_targets(&self, _args: &Value) -> Vec<PathBuf> {
        Vec::new()
    }

    async fn run(&self, args: Value, ctx: &ToolCtx) -> std::result::Result<Value, String>;
}
