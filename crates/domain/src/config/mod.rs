mod limits;
mod llm;
mod phases;
mod policy;
mod research;
mod server;
mod store;
mod tools;

pub use limits::*;
pub use llm::*;
pub use phases::*;
pub use policy::*;
pub use research::*;
pub use server::*;
pub use store::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub phases: PhasesConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub policy: PolicyDefaults,
    #[serde(default)]
    pub tools: ToolsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the loaded configuration. Errors abort startup; warnings are
    /// logged and startup continues.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let mut error = |field: &str, message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        };

        if self.limits.max_concurrent_turns == 0 {
            error(
                "limits.max_concurrent_turns",
                "must be at least 1".into(),
            );
        }
        if self.limits.llm_concurrency == 0 {
            error("limits.llm_concurrency", "must be at least 1".into());
        }
        if self.limits.browser_pool_size == 0 {
            error("limits.browser_pool_size", "must be at least 1".into());
        }
        if self.research.max_candidates == 0 {
            error("research.max_candidates", "must be at least 1".into());
        }
        if self.store.root.as_os_str().is_empty() {
            error("store.root", "must not be empty".into());
        }

        if self.limits.trace_ttl_seconds < 600 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "limits.trace_ttl_seconds".into(),
                message: format!(
                    "{} is below the 600s delivery guarantee; completed responses \
                     may expire before slow pollers retrieve them",
                    self.limits.trace_ttl_seconds
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.research.quality_target) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "research.quality_target".into(),
                message: "must be within [0, 1]".into(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let config = Config::default();
        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn zero_concurrency_is_an_error() {
        let mut config = Config::default();
        config.limits.llm_concurrency = 0;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error
                && i.field == "limits.llm_concurrency"));
    }

    #[test]
    fn short_trace_ttl_is_a_warning() {
        let mut config = Config::default();
        config.limits.trace_ttl_seconds = 30;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning
                && i.field == "limits.trace_ttl_seconds"));
    }
}
