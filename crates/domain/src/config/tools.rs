use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default per-call timeout for every tool, seconds.
    #[serde(default = "d_default_timeout")]
    pub default_timeout_seconds: u64,
    /// Per-tool overrides keyed by tool name.
    #[serde(default)]
    pub timeouts: HashMap<String, u64>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: d_default_timeout(),
            timeouts: HashMap::new(),
        }
    }
}

impl ToolsConfig {
    pub fn timeout_for(&self, tool: &str) -> Duration {
        let secs = self
            .timeouts
            .get(tool)
            .copied()
            .unwrap_or(self.default_timeout_seconds);
        Duration::from_secs(secs)
    }
}

fn d_default_timeout() -> u64 {
    60
}
