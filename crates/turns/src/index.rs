//! Recall indexes over finished turns.
//!
//! Two collaborator seams: a relational [`IndexSink`] used by the context
//! gatherer for recency/topic recall, and a [`VectorSink`] for embedding
//! collections (`turns`, `research`, `memories`). Neither is in the critical
//! path of answering; writes are fire-and-forget with one retry and a
//! warning artifact on failure, never an error.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pandora_domain::error::Result;
use pandora_domain::ids::TurnId;
use pandora_domain::plan::Intent;

use crate::store::TurnStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry & traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnIndexEntry {
    pub turn_number: TurnId,
    pub profile: String,
    pub topic: String,
    pub intent: Intent,
    /// Overall answer quality in [0, 1] as judged by validation.
    pub quality: f32,
    pub turn_dir: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Relational index over turns. Implementations own their storage.
pub trait IndexSink: Send + Sync {
    fn record(&self, entry: &TurnIndexEntry) -> Result<()>;

    /// Most recent entries for a profile, newest first.
    fn recent(&self, profile: &str, limit: usize) -> Result<Vec<TurnIndexEntry>>;
}

/// Vector index over turn artifacts. Implementations own their storage;
/// collection is one of `turns`, `research`, `memories`.
pub trait VectorSink: Send + Sync {
    fn upsert(&self, collection: &str, id: &str, text: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSONL-backed relational index: one `turns.jsonl` per profile under the
/// profile's `indexes/` directory.
pub struct JsonlIndexSink {
    store: Arc<TurnStore>,
}

impl JsonlIndexSink {
    pub fn new(store: Arc<TurnStore>) -> Self {
        Self { store }
    }

    fn index_path(&self, profile: &str) -> PathBuf {
        self.store.indexes_dir(profile).join("turns.jsonl")
    }
}

impl IndexSink for JsonlIndexSink {
    fn record(&self, entry: &TurnIndexEntry) -> Result<()> {
        let path = self.index_path(&entry.profile);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{json}")?;
        Ok(())
    }

    fn recent(&self, profile: &str, limit: usize) -> Result<Vec<TurnIndexEntry>> {
        let path = self.index_path(profile);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut entries: Vec<TurnIndexEntry> = raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}

/// Stand-in vector sink for deployments without an embedding store.
pub struct NoopVectorSink;

impl VectorSink for NoopVectorSink {
    fn upsert(&self, collection: &str, id: &str, _text: &str) -> Result<()> {
        tracing::debug!(collection, id, "vector sink disabled, upsert skipped");
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fire-and-forget write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Write a turn into both indexes off the turn's critical path. One retry,
/// then a warning artifact dropped next to the turn; never raises.
pub fn spawn_index_write(
    index: Arc<dyn IndexSink>,
    vector: Arc<dyn VectorSink>,
    entry: TurnIndexEntry,
    research_text: Option<String>,
) {
    tokio::spawn(async move {
        let relational = record_with_retry(index.as_ref(), &entry);

        let vector_result = (|| -> Result<()> {
            let id = format!("{}:{}", entry.profile, entry.turn_number);
            vector.upsert("turns", &id, &entry.topic)?;
            if let Some(ref text) = research_text {
                if !text.is_empty() {
                    vector.upsert("research", &id, text)?;
                }
            }
            Ok(())
        })();

        if let Err(e) = relational.and(vector_result) {
            tracing::warn!(
                profile = %entry.profile,
                turn = entry.turn_number,
                error = %e,
                "index write failed; dropping warning artifact"
            );
            let warning = serde_json::json!({
                "warning": "index_write_failed",
                "error": e.to_string(),
                "at": Utc::now().to_rfc3339(),
            });
            let path = entry.turn_dir.join("artifacts").join("index_warning.json");
            if let Err(write_err) =
                std::fs::write(&path, serde_json::to_vec_pretty(&warning).unwrap_or_default())
            {
                tracing::warn!(error = %write_err, "could not write index warning artifact");
            }
        }
    });
}

fn record_with_retry(index: &dyn IndexSink, entry: &TurnIndexEntry) -> Result<()> {
    match index.record(entry) {
        Ok(()) => Ok(()),
        Err(first) => {
            tracing::debug!(error = %first, "index record failed, retrying once");
            index.record(entry)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
