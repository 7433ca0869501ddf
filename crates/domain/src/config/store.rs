use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn document store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory for all profiles:
    /// `<root>/<profile>/turns/<turn_id>/...` and `<root>/<profile>/indexes/`.
    #[serde(default = "d_root")]
    pub root: PathBuf,
    /// Whether to write the verbose `transcript.json` with raw LLM traffic.
    #[serde(default)]
    pub keep_transcripts: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: d_root(),
            keep_transcripts: false,
        }
    }
}

fn d_root() -> PathBuf {
    PathBuf::from("./data")
}
