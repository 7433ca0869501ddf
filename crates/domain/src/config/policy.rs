use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::policy::{Mode, PolicyRecord};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Initial policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The initial [`PolicyRecord`] applied to profiles that have not set one
/// explicitly, plus the write-path exclusion list shared by all profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDefaults {
    #[serde(default = "d_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub allow_writes: bool,
    #[serde(default = "d_true")]
    pub require_confirm: bool,
    #[serde(default)]
    pub allowed_write_paths: Vec<String>,
    #[serde(default)]
    pub tool_enables: HashMap<String, bool>,
    /// Directory names no write may ever target, regardless of allowlist.
    #[serde(default = "d_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            mode: d_mode(),
            allow_writes: false,
            require_confirm: true,
            allowed_write_paths: Vec::new(),
            tool_enables: HashMap::new(),
            excluded_dirs: d_excluded_dirs(),
        }
    }
}

impl PolicyDefaults {
    pub fn to_record(&self) -> PolicyRecord {
        PolicyRecord {
            mode: self.mode,
            allow_writes: self.allow_writes,
            require_confirm: self.require_confirm,
            allowed_write_paths: self.allowed_write_paths.clone(),
            tool_enables: self.tool_enables.clone(),
        }
    }
}

fn d_mode() -> Mode {
    Mode::Chat
}
fn d_true() -> bool {
    true
}
fn d_excluded_dirs() -> Vec<String> {
    vec![".git".into(), "node_modules".into(), "target".into()]
}
