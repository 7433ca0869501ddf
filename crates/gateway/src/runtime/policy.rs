//! Policy Engine — per-(profile, mode) capability records.
//!
//! Records are read as snapshots at the start of each tool dispatch;
//! modifications are explicit `set_policy` calls, never implicit mutation
//! by phases.

use std::collections::HashMap;

use parking_lot::RwLock;

use pandora_domain::config::PolicyDefaults;
use pandora_domain::policy::{Mode, PolicyRecord};

pub struct PolicyEngine {
    records: RwLock<HashMap<(String, Mode), PolicyRecord>>,
    defaults: PolicyDefaults,
}

impl PolicyEngine {
    pub fn new(defaults: PolicyDefaults) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    /// Effective policy snapshot for a profile + mode. Falls back to the
    /// configured defaults with the mode applied; `chat` mode never allows
    /// writes regardless of the default record.
    pub fn get_policy(&self, profile: &str, mode: Mode) -> PolicyRecord {
        if let Some(record) = self.records.read().get(&(profile.to_owned(), mode)) {
            return record.clone();
        }
        let mut record = self.defaults.to_record();
        record.mode = mode;
        if mode == Mode::Chat {
            record.allow_writes = false;
        }
        record
    }

    /// Install an explicit record for a profile. Keyed by the record's mode.
    pub fn set_policy(&self, profile: &str, record: PolicyRecord) {
        let mut sanitized = record;
        if sanitized.mode == Mode::Chat {
            // chat mode must reject all filesystem-write tools.
            sanitized.allow_writes = false;
        }
        tracing::info!(profile, mode = %sanitized.mode, "policy updated");
        self.records
            .write()
            .insert((profile.to_owned(), sanitized.mode), sanitized);
    }

    /// Directory names excluded from every write path.
    pub fn excluded_dirs(&self) -> &[String] {
        &self.defaults.excluded_dirs
    }
}
