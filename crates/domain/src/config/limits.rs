use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Concurrency & retention limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Bound on schedulers running in parallel.
    #[serde(default = "d_max_concurrent_turns")]
    pub max_concurrent_turns: usize,
    /// Cap on simultaneous LLM calls across all turns.
    #[serde(default = "d_llm_concurrency")]
    pub llm_concurrency: usize,
    /// Research parallelism: one browser session per active candidate.
    #[serde(default = "d_browser_pool_size")]
    pub browser_pool_size: usize,
    /// Trace Hub retention after a terminal event.
    #[serde(default = "d_trace_ttl")]
    pub trace_ttl_seconds: u64,
    /// Cadence of the job registry sweep.
    #[serde(default = "d_job_sweep_interval")]
    pub job_sweep_interval_seconds: u64,
    /// Pending interventions auto-expire after this long.
    #[serde(default = "d_intervention_ttl")]
    pub intervention_ttl_seconds: u64,
    /// Pending permission requests auto-reject after this long.
    #[serde(default = "d_permission_ttl")]
    pub permission_ttl_seconds: u64,
    /// How long shutdown waits for active turns to drain.
    #[serde(default = "d_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_turns: d_max_concurrent_turns(),
            llm_concurrency: d_llm_concurrency(),
            browser_pool_size: d_browser_pool_size(),
            trace_ttl_seconds: d_trace_ttl(),
            job_sweep_interval_seconds: d_job_sweep_interval(),
            intervention_ttl_seconds: d_intervention_ttl(),
            permission_ttl_seconds: d_permission_ttl(),
            shutdown_grace_seconds: d_shutdown_grace(),
        }
    }
}

fn d_max_concurrent_turns() -> usize {
    8
}
fn d_llm_concurrency() -> usize {
    4
}
fn d_browser_pool_size() -> usize {
    2
}
fn d_trace_ttl() -> u64 {
    600
}
fn d_job_sweep_interval() -> u64 {
    300
}
fn d_intervention_ttl() -> u64 {
    900
}
fn d_permission_ttl() -> u64 {
    600
}
fn d_shutdown_grace() -> u64 {
    20
}
