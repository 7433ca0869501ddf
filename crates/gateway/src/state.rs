//! Shared application state: one handle per subsystem, created at startup
//! in dependency order and threaded through the scheduler and API handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use pandora_domain::config::Config;
use pandora_domain::error::Result;
use pandora_providers::{LlmClient, LlmRegistry};
use pandora_tools::file_ops::{FsAppendTool, FsListTool, FsReadTool, FsWriteTool};
use pandora_tools::web::{BrowserPool, FetchTool, PageFetcher, SearchProvider, SearchTool};
use pandora_tools::{Tool, ToolRegistry, ToolRouter};
use pandora_turns::{IndexSink, JsonlIndexSink, NoopVectorSink, TurnStore, VectorSink};

use crate::runtime::cancel::CancelMap;
use crate::runtime::interventions::InterventionBroker;
use crate::runtime::jobs::JobRegistry;
use crate::runtime::permissions::PermissionBroker;
use crate::runtime::policy::PolicyEngine;
use crate::runtime::trace::TraceHub;

/// Shared application state passed to all API handlers.
///
/// Init order: Policy → TurnStore → TraceHub → JobRegistry →
/// InterventionBroker → ToolRouter → Scheduler → Gateway. Teardown is the
/// reverse, draining active turns first.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Stores ────────────────────────────────────────────────────────
    pub store: Arc<TurnStore>,
    pub index: Arc<dyn IndexSink>,
    pub vector: Arc<dyn VectorSink>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub policy: Arc<PolicyEngine>,
    pub hub: Arc<TraceHub>,
    pub jobs: Arc<JobRegistry>,
    pub interventions: Arc<InterventionBroker>,
    pub permissions: Arc<PermissionBroker>,
    pub cancel_map: Arc<CancelMap>,

    // ── Collaborators ─────────────────────────────────────────────────
    pub llm: Arc<LlmRegistry>,
    pub tools: Arc<ToolRouter>,
    pub browser_pool: Arc<BrowserPool>,

    /// Bound on schedulers running in parallel.
    pub turn_permits: Arc<Semaphore>,

    /// SHA-256 of the API bearer token; `None` = dev mode, auth disabled.
    pub api_token_hash: Option<Vec<u8>>,
}

/// Wire up the full state from a config plus the three collaborator seams.
/// `serve` passes production implementations; tests pass scripted ones.
pub fn build_state(
    config: Arc<Config>,
    llm_client: Arc<dyn LlmClient>,
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn PageFetcher>,
) -> Result<AppState> {
    let policy = Arc::new(PolicyEngine::new(config.policy.clone()));
    let store = Arc::new(TurnStore::new(&config.store.root)?);
    let index: Arc<dyn IndexSink> = Arc::new(JsonlIndexSink::new(store.clone()));
    let vector: Arc<dyn VectorSink> = Arc::new(NoopVectorSink);

    let hub = Arc::new(TraceHub::new(Duration::from_secs(
        config.limits.trace_ttl_seconds,
    )));
    let jobs = Arc::new(JobRegistry::new());
    let interventions = Arc::new(InterventionBroker::new(Duration::from_secs(
        config.limits.intervention_ttl_seconds,
    )));
    let permissions = Arc::new(PermissionBroker::new(Duration::from_secs(
        config.limits.permission_ttl_seconds,
    )));
    let cancel_map = Arc::new(CancelMap::new());

    let llm = Arc::new(LlmRegistry::new(llm_client, config.limits.llm_concurrency));

    let tool_set: Vec<Arc<dyn Tool>> = vec![
        Arc::new(FsReadTool),
        Arc::new(FsWriteTool),
        Arc::new(FsAppendTool),
        Arc::new(FsListTool),
        Arc::new(SearchTool::new(search)),
        Arc::new(FetchTool::new(fetcher)),
    ];
    let registry = Arc::new(ToolRegistry::with_tools(tool_set));
    let tools = Arc::new(ToolRouter::new(
        registry,
        config.tools.clone(),
        permissions.clone(),
        config.policy.excluded_dirs.clone(),
    ));

    let browser_pool = Arc::new(BrowserPool::new(config.limits.browser_pool_size));
    let turn_permits = Arc::new(Semaphore::new(config.limits.max_concurrent_turns.max(1)));

    let api_token_hash = read_token_hash(&config.server.api_token_env);

    Ok(AppState {
        config,
        store,
        index,
        vector,
        policy,
        hub,
        jobs,
        interventions,
        permissions,
        cancel_map,
        llm,
        tools,
        browser_pool,
        turn_permits,
        api_token_hash,
    })
}

fn read_token_hash(env_var: &str) -> Option<Vec<u8>> {
    use sha2::{Digest, Sha256};
    match std::env::var(env_var) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var, "API bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(env_var, "API bearer-token auth DISABLED — set {env_var} to enable");
            None
        }
    }
}
