//! Policy records: mode → capability mapping, write-path allowlist, and the
//! pure `check` function evaluated against a policy snapshot.
//!
//! Path resolution (symlinks, canonicalization) is I/O and lives with the
//! tool router; this module only decides what a given snapshot permits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mode & record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Chat,
    Code,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Mode::Chat => "chat",
            Mode::Code => "code",
        })
    }
}

/// The capability set effective for a profile + mode. Modifications are
/// explicit operations on the policy engine; phases never mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub mode: Mode,
    pub allow_writes: bool,
    pub require_confirm: bool,
    #[serde(default)]
    pub allowed_write_paths: Vec<String>,
    /// Per-tool enable overrides. Absent = enabled.
    #[serde(default)]
    pub tool_enables: HashMap<String, bool>,
}

impl PolicyRecord {
    /// The default `chat` policy: no filesystem writes at all.
    pub fn chat_default() -> Self {
        Self {
            mode: Mode::Chat,
            allow_writes: false,
            require_confirm: true,
            allowed_write_paths: Vec::new(),
            tool_enables: HashMap::new(),
        }
    }

    pub fn tool_enabled(&self, name: &str) -> bool {
        self.tool_enables.get(name).copied().unwrap_or(true)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An action submitted for a policy decision.
#[derive(Debug, Clone)]
pub enum PolicyAction<'a> {
    /// Invoke a named tool (non-writing).
    InvokeTool { name: &'a str },
    /// A tool wants to write inside the allowlist. `inside_allowlist` is the
    /// router's path-resolution verdict; the record decides what follows.
    WriteFile { tool: &'a str, inside_allowlist: bool },
}

/// The outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    /// Allowed only after a human confirmation (Permission Request).
    NeedsConfirm,
    Deny(String),
}

/// Purely functional check against a policy snapshot.
///
/// `chat` mode rejects all filesystem writes. In `code` mode a write inside
/// the allowlist still needs confirmation when `require_confirm` is set; a
/// write outside the allowlist always needs confirmation.
pub fn check(policy: &PolicyRecord, action: &PolicyAction<'_>) -> PolicyDecision {
    match action {
        PolicyAction::InvokeTool { name } => {
            if policy.tool_enabled(name) {
                PolicyDecision::Allow
            } else {
                PolicyDecision::Deny(format!("tool '{name}' is disabled by policy"))
            }
        }
        PolicyAction::WriteFile { tool, inside_allowlist } => {
            if !policy.tool_enabled(tool) {
                return PolicyDecision::Deny(format!("tool '{tool}' is disabled by policy"));
            }
            if policy.mode == Mode::Chat || !policy.allow_writes {
                return PolicyDecision::Deny(format!(
                    "filesystem writes are not permitted in {} mode",
                    policy.mode
                ));
            }
            if !inside_allowlist {
                // Outside the allowlist: only a human can let this through.
                return PolicyDecision::NeedsConfirm;
            }
            if policy.require_confirm {
                PolicyDecision::NeedsConfirm
            } else {
                PolicyDecision::Allow
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_policy(require_confirm: bool) -> PolicyRecord {
        PolicyRecord {
            mode: Mode::Code,
            allow_writes: true,
            require_confirm,
            allowed_write_paths: vec!["/work".into()],
            tool_enables: HashMap::new(),
        }
    }

    #[test]
    fn chat_mode_denies_all_writes() {
        let policy = PolicyRecord::chat_default();
        let decision = check(
            &policy,
            &PolicyAction::WriteFile { tool: "fs.write", inside_allowlist: true },
        );
        assert!(matches!(decision, PolicyDecision::Deny(_)));
    }

    #[test]
    fn disabled_tool_is_denied() {
        let mut policy = PolicyRecord::chat_default();
        policy.tool_enables.insert("web.search".into(), false);
        let decision = check(&policy, &PolicyAction::InvokeTool { name: "web.search" });
        assert!(matches!(decision, PolicyDecision::Deny(_)));

        let ok = check(&policy, &PolicyAction::InvokeTool { name: "web.fetch" });
        assert_eq!(ok, PolicyDecision::Allow);
    }

    #[test]
    fn code_mode_inside_allowlist_respects_confirm_flag() {
        let confirm = check(
            &code_policy(true),
            &PolicyAction::WriteFile { tool: "fs.write", inside_allowlist: true },
        );
        assert_eq!(confirm, PolicyDecision::NeedsConfirm);

        let allow = check(
            &code_policy(false),
            &PolicyAction::WriteFile { tool: "fs.write", inside_allowlist: true },
        );
        assert_eq!(allow, PolicyDecision::Allow);
    }

    #[test]
    fn code_mode_outside_allowlist_always_confirms() {
        let decision = check(
            &code_policy(false),
            &PolicyAction::WriteFile { tool: "fs.write", inside_allowlist: false },
        );
        assert_eq!(decision, PolicyDecision::NeedsConfirm);
    }
}
