//! Validated dispatch of named tool calls with policy gates.
//!
//! `execute` owns the full call lifecycle: registration lookup, policy
//! check, write-path validation with the confirmation gate, timeout,
//! cancellation, and result stamping for observability.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use pandora_domain::config::ToolsConfig;
use pandora_domain::error::{Error, TimeoutKind};
use pandora_domain::policy::{check, PolicyAction, PolicyDecision, PolicyRecord};

use crate::paths::{path_allowed, resolve_write_path};
use crate::registry::ToolRegistry;
use crate::ToolCtx;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error taxonomy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    BlockedByPolicy(String),
    BadArgs(String),
    Timeout,
    Failed(String),
    Cancelled,
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BlockedByPolicy(_) => "blocked_by_policy",
            Self::BadArgs(_) => "bad_args",
            Self::Timeout => "timeout",
            Self::Failed(_) => "tool_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlockedByPolicy(reason) => write!(f, "blocked_by_policy: {reason}"),
            Self::BadArgs(reason) => write!(f, "bad_args: {reason}"),
            Self::Timeout => write!(f, "timeout"),
            Self::Failed(detail) => write!(f, "tool_failed: {detail}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stamps & outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Observability stamp attached to every tool call, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStamp {
    pub tool: String,
    pub args_digest: String,
    pub duration_ms: u64,
    pub status: String,
    /// Serialized result size in bytes (0 on failure).
    pub size: usize,
}

/// The stamped result of one dispatch.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub stamp: ToolStamp,
    pub result: Result<Value, ToolError>,
}

impl ToolOutcome {
    /// Line appended to `toolresults.md` for this call.
    pub fn to_record(&self) -> String {
        let body = match &self.result {
            Ok(value) => serde_json::to_string(value).unwrap_or_default(),
            Err(e) => format!("error: {e}"),
        };
        format!(
            "### {} ({} ms, {})\n{}\n",
            self.stamp.tool, self.stamp.duration_ms, self.stamp.status, body
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Confirmation gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The human-approval seam for writes that need confirmation: a sibling of
/// the intervention broker but scoped to local writes. The gateway wires
/// its permission broker in here.
#[async_trait]
pub trait ConfirmGate: Send + Sync {
    /// Suspend until a human approves (`Ok(true)`), denies (`Ok(false)`), or
    /// the request times out (`Err(Timeout)`).
    async fn confirm_write(
        &self,
        profile: &str,
        trace_id: &str,
        tool: &str,
        path: &Path,
    ) -> pandora_domain::Result<bool>;
}

/// Gate that denies everything; used where no broker is wired.
pub struct DenyAllGate;

#[async_trait]
impl ConfirmGate for DenyAllGate {
    async fn confirm_write(
        &self,
        _profile: &str,
        _trace_id: &str,
        _tool: &str,
        _path: &Path,
    ) -> pandora_domain::Result<bool> {
        Ok(false)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
    config: ToolsConfig,
    confirm: Arc<dyn ConfirmGate>,
    /// Directory names no write may target regardless of allowlist.
    excluded_dirs: Vec<String>,
}

impl ToolRouter {
    pub fn new(
        registry: Arc<ToolRegistry>,
        config: ToolsConfig,
        confirm: Arc<dyn ConfirmGate>,
        excluded_dirs: Vec<String>,
    ) -> Self {
        Self {
            registry,
            config,
            confirm,
            excluded_dirs,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatch one tool call under the given policy snapshot.
    pub async fn execute(
        &self,
        tool_name: &str,
        args: Value,
        ctx: &ToolCtx,
        policy: &PolicyRecord,
    ) -> ToolOutcome {
        let started = std::time::Instant::now();
        let args_digest = digest_args(&args);

        let result = self.execute_inner(tool_name, args, ctx, policy).await;

        let (status, size) = match &result {
            Ok(value) => (
                "ok".to_string(),
                serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0),
            ),
            Err(e) => (e.kind().to_string(), 0),
        };
        let stamp = ToolStamp {
            tool: tool_name.to_string(),
            args_digest,
            duration_ms: started.elapsed().as_millis() as u64,
            status,
            size,
        };
        tracing::debug!(
            tool = %stamp.tool,
            status = %stamp.status,
            duration_ms = stamp.duration_ms,
            size = stamp.size,
            "tool dispatched"
        );
        ToolOutcome { stamp, result }
    }

    async fn execute_inner(
        &self,
        tool_name: &str,
        args: Value,
        ctx: &ToolCtx,
        policy: &PolicyRecord,
    ) -> Result<Value, ToolError> {
        // 1. Registration + enablement.
        let Some(tool) = self.registry.get(tool_name) else {
            return Err(ToolError::BadArgs(format!("unknown tool '{tool_name}'")));
        };
        match check(policy, &PolicyAction::InvokeTool { name: tool_name }) {
            PolicyDecision::Allow => {}
            PolicyDecision::Deny(reason) => return Err(ToolError::BlockedByPolicy(reason)),
            PolicyDecision::NeedsConfirm => {
                // Invocation alone never needs confirmation.
                return Err(ToolError::BlockedByPolicy(
                    "unexpected confirmation requirement for non-write call".into(),
                ));
            }
        }

        // 2. Write-path validation for filesystem-writing calls.
        for target in tool.write_targets(&args) {
            let resolved = resolve_write_path(&target).map_err(ToolError::BadArgs)?;
            let inside_allowlist =
                path_allowed(&resolved, &policy.allowed_write_paths, &self.excluded_dirs);

            match check(
                policy,
                &PolicyAction::WriteFile {
                    tool: tool_name,
                    inside_allowlist,
                },
            ) {
                PolicyDecision::Allow => {}
                PolicyDecision::Deny(reason) => {
                    return Err(ToolError::BlockedByPolicy(reason));
                }
                PolicyDecision::NeedsConfirm => {
                    let approved = tokio::select! {
                        _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
                        outcome = self.confirm.confirm_write(
                            &ctx.profile,
                            &ctx.trace_id,
                            tool_name,
                            &resolved,
                        ) => match outcome {
                            Ok(approved) => approved,
                            Err(Error::Timeout(TimeoutKind::Permission)) => {
                                return Err(ToolError::Timeout);
                            }
                            Err(e) => return Err(ToolError::Failed(e.to_string())),
                        },
                    };
                    if !approved {
                        return Err(ToolError::BlockedByPolicy(format!(
                            "write to '{}' was not approved",
                            resolved.display()
                        )));
                    }
                }
            }
        }

        // 3. Run under timeout + cancellation.
        let timeout = self.config.timeout_for(tool_name);
        self.run_bounded(tool.as_ref(), args, ctx, timeout).await
    }

    async fn run_bounded(
        &self,
        tool: &dyn crate::Tool,
        args: Value,
        ctx: &ToolCtx,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(ToolError::Timeout),
            result = tool.run(args, ctx) => result.map_err(ToolError::Failed),
        }
    }
}

fn digest_args(args: &Value) -> String {
    let serialized = serde_json::to_vec(args).unwrap_or_default();
    hex::encode(Sha256::digest(&serialized))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tool;
    use pandora_domain::cancel::CancelToken;
    use pandora_domain::policy::Mode;
    use std::path::PathBuf;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo args back"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn run(&self, args: Value, _ctx: &ToolCtx) -> Result<Value, String> {
            Ok(args)
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn run(&self, _args: Value, _ctx: &ToolCtx) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    struct WriteTool;

    #[async_trait]
    impl Tool for WriteTool {
        fn name(&self) -> &str {
            "fs.write"
        }
        fn description(&self) -> &str {
            "write a file"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        fn write_targets(&self, args: &Value) -> Vec<PathBuf> {
            args.get("path")
                .and_then(Value::as_str)
                .map(|p| vec![PathBuf::from(p)])
                .unwrap_or_default()
        }
        async fn run(&self, _args: Value, _ctx: &ToolCtx) -> Result<Value, String> {
            Ok(serde_json::json!({"written": true}))
        }
    }

    struct ApproveAllGate;

    #[async_trait]
    impl ConfirmGate for ApproveAllGate {
        async fn confirm_write(
            &self,
            _profile: &str,
            _trace_id: &str,
            _tool: &str,
            _path: &Path,
        ) -> pandora_domain::Result<bool> {
            Ok(true)
        }
    }

    fn make_router(gate: Arc<dyn ConfirmGate>, timeout_secs: u64) -> ToolRouter {
        let registry = Arc::new(ToolRegistry::with_tools(vec![
            Arc::new(Echo),
            Arc::new(SlowTool),
            Arc::new(WriteTool),
        ]));
        let mut config = ToolsConfig::default();
        config.default_timeout_seconds = timeout_secs;
        ToolRouter::new(registry, config, gate, vec![".git".into()])
    }

    fn ctx() -> ToolCtx {
        ToolCtx::new("p", "tr_test", CancelToken::new())
    }

    fn chat_policy() -> PolicyRecord {
        PolicyRecord::chat_default()
    }

    fn code_policy(dir: &Path) -> PolicyRecord {
        PolicyRecord {
            mode: Mode::Code,
            allow_writes: true,
            require_confirm: false,
            allowed_write_paths: vec![dir
                .canonicalize()
                .unwrap()
                .to_string_lossy()
                .to_string()],
            tool_enables: Default::default(),
        }
    }

    #[tokio::test]
    async fn echo_round_trip_is_stamped() {
        let router = make_router(Arc::new(DenyAllGate), 5);
        let outcome = router
            .execute("echo", serde_json::json!({"x": 1}), &ctx(), &chat_policy())
            .await;
        assert_eq!(outcome.result.unwrap()["x"], 1);
        assert_eq!(outcome.stamp.status, "ok");
        assert_eq!(outcome.stamp.tool, "echo");
        assert_eq!(outcome.stamp.args_digest.len(), 64);
        assert!(outcome.stamp.size > 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_bad_args() {
        let router = make_router(Arc::new(DenyAllGate), 5);
        let outcome = router
            .execute("nope", Value::Null, &ctx(), &chat_policy())
            .await;
        assert!(matches!(outcome.result, Err(ToolError::BadArgs(_))));
        assert_eq!(outcome.stamp.status, "bad_args");
    }

    #[tokio::test]
    async fn disabled_tool_is_blocked() {
        let router = make_router(Arc::new(DenyAllGate), 5);
        let mut policy = chat_policy();
        policy.tool_enables.insert("echo".into(), false);
        let outcome = router.execute("echo", Value::Null, &ctx(), &policy).await;
        assert!(matches!(outcome.result, Err(ToolError::BlockedByPolicy(_))));
    }

    #[tokio::test]
    async fn chat_mode_write_is_blocked_by_policy() {
        let dir = tempfile::tempdir().unwrap();
        let router = make_router(Arc::new(ApproveAllGate), 5);
        let args = serde_json::json!({"path": dir.path().join("f.txt")});
        let outcome = router.execute("fs.write", args, &ctx(), &chat_policy()).await;
        assert!(matches!(outcome.result, Err(ToolError::BlockedByPolicy(_))));
        assert_eq!(outcome.stamp.status, "blocked_by_policy");
    }

    #[tokio::test]
    async fn code_mode_write_inside_allowlist_runs() {
        let dir = tempfile::tempdir().unwrap();
        let router = make_router(Arc::new(DenyAllGate), 5);
        let args = serde_json::json!({"path": dir.path().join("f.txt")});
        let outcome = router
            .execute("fs.write", args, &ctx(), &code_policy(dir.path()))
            .await;
        assert!(outcome.result.is_ok());
    }

    #[tokio::test]
    async fn write_outside_allowlist_needs_gate_approval() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let args = serde_json::json!({"path": other.path().join("f.txt")});

        // Denying gate blocks it.
        let router = make_router(Arc::new(DenyAllGate), 5);
        let outcome = router
            .execute("fs.write", args.clone(), &ctx(), &code_policy(dir.path()))
            .await;
        assert!(matches!(outcome.result, Err(ToolError::BlockedByPolicy(_))));

        // Approving gate lets it through.
        let router = make_router(Arc::new(ApproveAllGate), 5);
        let outcome = router
            .execute("fs.write", args, &ctx(), &code_policy(dir.path()))
            .await;
        assert!(outcome.result.is_ok());
    }

    #[tokio::test]
    async fn confirm_flag_requires_gate_even_inside_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = code_policy(dir.path());
        policy.require_confirm = true;
        let args = serde_json::json!({"path": dir.path().join("f.txt")});

        let router = make_router(Arc::new(DenyAllGate), 5);
        let outcome = router.execute("fs.write", args, &ctx(), &policy).await;
        assert!(matches!(outcome.result, Err(ToolError::BlockedByPolicy(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let router = make_router(Arc::new(DenyAllGate), 1);
        let outcome = router.execute("slow", Value::Null, &ctx(), &chat_policy()).await;
        assert!(matches!(outcome.result, Err(ToolError::Timeout)));
        assert_eq!(outcome.stamp.status, "timeout");
    }

    #[tokio::test]
    async fn cancellation_aborts_dispatch() {
        let router = make_router(Arc::new(DenyAllGate), 60);
        let token = CancelToken::new();
        let call_ctx = ToolCtx::new("p", "tr_test", token.clone());

        let handle = tokio::spawn(async move {
            router
                .execute("slow", Value::Null, &call_ctx, &PolicyRecord::chat_default())
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome.result, Err(ToolError::Cancelled)));
    }

    #[tokio::test]
    async fn digest_is_stable_for_identical_args() {
        let a = digest_args(&serde_json::json!({"q": "rust"}));
        let b = digest_args(&serde_json::json!({"q": "rust"}));
        let c = digest_args(&serde_json::json!({"q": "other"}));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
