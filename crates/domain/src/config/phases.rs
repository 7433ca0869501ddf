use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::trace::Phase;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase budgets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-phase soft budgets. Exceeding a budget emits a warning event; the
/// scheduler never kills a phase unless cancellation is requested.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PhasesConfig {
    /// Overrides keyed by phase name (`analyzer`, `executor`, ...), seconds.
    #[serde(default)]
    pub budgets: HashMap<String, u64>,
}

impl PhasesConfig {
    /// Default budgets: 30s everywhere except the research-capable Executor
    /// (30 minutes).
    pub fn budget_for(&self, phase: Phase) -> Duration {
        if let Some(&secs) = self.budgets.get(phase.name()) {
            return Duration::from_secs(secs);
        }
        match phase {
            Phase::Executor => Duration::from_secs(30 * 60),
            _ => Duration::from_secs(30),
        }
    }
}
