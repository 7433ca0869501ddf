//! The turn store: id allocation, section writes, and close semantics.
//!
//! Writes go through temp+rename so a crash never leaves a partial section
//! on disk. A single writer per turn is enforced with an in-process mutex
//! keyed by `(profile, turn_id)`; id allocation additionally takes an
//! advisory file lock so multiple processes sharing a root stay monotonic.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};

use pandora_domain::error::{Error, Result};
use pandora_domain::ids::TurnId;
use pandora_domain::trace::Phase;

use crate::document::{
    append_to_subsection, context_skeleton, last_written_subsection, CloseMarker, Section,
    TurnOutcome,
};

const ALLOCATOR_FILE: &str = ".allocator";
const CLOSE_MARKER_FILE: &str = "closed.json";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TurnStore {
    root: PathBuf,
    /// Per-profile allocation serialization within this process.
    alloc_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Per-turn write serialization.
    turn_locks: Mutex<HashMap<(String, TurnId), Arc<Mutex<()>>>>,
    /// Turns known to be closed (cache over the on-disk marker).
    closed: RwLock<HashSet<(String, TurnId)>>,
}

impl TurnStore {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        tracing::info!(root = %root.display(), "turn store ready");
        Ok(Self {
            root: root.to_path_buf(),
            alloc_locks: Mutex::new(HashMap::new()),
            turn_locks: Mutex::new(HashMap::new()),
            closed: RwLock::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile_dir(&self, profile: &str) -> PathBuf {
        self.root.join(sanitize_component(profile))
    }

    pub fn turns_dir(&self, profile: &str) -> PathBuf {
        self.profile_dir(profile).join("turns")
    }

    pub fn turn_dir(&self, profile: &str, turn_id: TurnId) -> PathBuf {
        self.turns_dir(profile).join(turn_id.to_string())
    }

    pub fn indexes_dir(&self, profile: &str) -> PathBuf {
        self.profile_dir(profile).join("indexes")
    }

    // ── Allocation ──────────────────────────────────────────────────

    /// Allocate the next turn id for a profile and create its folder with
    /// the `context.md` skeleton. The allocator file is the authority, not
    /// the filesystem listing; ids are strictly increasing even when two
    /// requests race.
    pub fn open_turn(&self, profile: &str) -> Result<(TurnId, PathBuf)> {
        let lock = self.profile_alloc_lock(profile);
        let _guard = lock.lock();

        let turns_dir = self.turns_dir(profile);
        std::fs::create_dir_all(&turns_dir)?;

        let turn_id = self.allocate_id(&turns_dir)?;

        let dir = turns_dir.join(turn_id.to_string());
        std::fs::create_dir_all(dir.join("artifacts"))?;
        write_atomic(&dir.join(Section::Context.filename()), context_skeleton(turn_id).as_bytes())?;

        tracing::debug!(profile, turn_id, dir = %dir.display(), "turn opened");
        Ok((turn_id, dir))
    }

    /// Read-increment-write the allocator file under an advisory lock.
    fn allocate_id(&self, turns_dir: &Path) -> Result<TurnId> {
        let path = turns_dir.join(ALLOCATOR_FILE);
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        file.lock_exclusive()?;

        let result = (|| -> Result<TurnId> {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            let last: TurnId = contents.trim().parse().unwrap_or(0);

            // A missing or reset allocator file must never reuse an id that
            // already exists on disk.
            let on_disk = max_existing_id(turns_dir);
            let next = last.max(on_disk) + 1;

            file.seek(SeekFrom::Start(0))?;
            file.set_len(0)?;
            write!(file, "{next}")?;
            file.sync_all()?;
            Ok(next)
        })();

        let _ = fs2::FileExt::unlock(&file);
        result
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Read a section's full text. Missing sections read as empty;
    /// prior-turn reads are best-effort.
    pub fn read_section(&self, profile: &str, turn_id: TurnId, section: Section) -> Result<String> {
        let path = self.turn_dir(profile, turn_id).join(section.filename());
        if !path.exists() {
            return Ok(String::new());
        }
        Ok(std::fs::read_to_string(&path)?)
    }

    /// The text of one `context.md` subsection.
    pub fn read_subsection(&self, profile: &str, turn_id: TurnId, phase: Phase) -> Result<String> {
        let content = self.read_section(profile, turn_id, Section::Context)?;
        let sections = crate::document::split_subsections(&content);
        Ok(sections[phase.index()].clone())
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Append to `research.md` / `toolresults.md` / `transcript.json`.
    /// `context.md` is subsection-scoped; use [`Self::append_subsection`].
    pub fn append_section(
        &self,
        profile: &str,
        turn_id: TurnId,
        section: Section,
        text: &str,
    ) -> Result<()> {
        if section == Section::Context {
            return Err(Error::Store(
                "context.md is subsection-scoped; use append_subsection".into(),
            ));
        }
        let lock = self.turn_write_lock(profile, turn_id);
        let _guard = lock.lock();
        self.ensure_open(profile, turn_id)?;

        let path = self.turn_dir(profile, turn_id).join(section.filename());
        let mut content = if path.exists() {
            std::fs::read_to_string(&path)?
        } else {
            String::new()
        };
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(text);
        content.push('\n');
        write_atomic(&path, content.as_bytes())
    }

    /// Append under a phase's `context.md` subsection. Subsections are
    /// produced in phase order: opening a still-empty subsection below an
    /// already-written later one is rejected. Re-appending to a subsection
    /// that already has content stays legal (the synthesis revise pass).
    pub fn append_subsection(
        &self,
        profile: &str,
        turn_id: TurnId,
        phase: Phase,
        text: &str,
    ) -> Result<()> {
        let lock = self.turn_write_lock(profile, turn_id);
        let _guard = lock.lock();
        self.ensure_open(profile, turn_id)?;

        let path = self.turn_dir(profile, turn_id).join(Section::Context.filename());
        let content = std::fs::read_to_string(&path)?;

        if let Some(last) = last_written_subsection(&content) {
            let already_written = !crate::document::split_subsections(&content)[phase.index()]
                .trim()
                .is_empty();
            if phase.index() < last && !already_written {
                return Err(Error::Store(format!(
                    "subsection §{} cannot be opened after §{last}",
                    phase.index()
                )));
            }
        }

        let rewritten = append_to_subsection(&content, phase, text).ok_or_else(|| {
            Error::Store(format!("context.md is missing the §{} header", phase.index()))
        })?;
        write_atomic(&path, rewritten.as_bytes())
    }

    /// Write a sibling file under `artifacts/`.
    pub fn attach_artifact(
        &self,
        profile: &str,
        turn_id: TurnId,
        name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let lock = self.turn_write_lock(profile, turn_id);
        let _guard = lock.lock();
        self.ensure_open(profile, turn_id)?;

        let path = self
            .turn_dir(profile, turn_id)
            .join("artifacts")
            .join(sanitize_component(name));
        write_atomic(&path, bytes)?;
        Ok(path)
    }

    // ── Close ───────────────────────────────────────────────────────

    /// Close a turn. Idempotent: the first outcome wins and later calls are
    /// no-ops. After closing only reads succeed.
    pub fn close_turn(&self, profile: &str, turn_id: TurnId, outcome: TurnOutcome) -> Result<()> {
        let lock = self.turn_write_lock(profile, turn_id);
        let _guard = lock.lock();

        if self.is_closed(profile, turn_id) {
            return Ok(());
        }

        let marker = CloseMarker {
            closed_at: Utc::now(),
            outcome,
        };
        let path = self.turn_dir(profile, turn_id).join(CLOSE_MARKER_FILE);
        write_atomic(&path, serde_json::to_vec_pretty(&marker)?.as_slice())?;
        self.closed
            .write()
            .insert((profile.to_owned(), turn_id));
        tracing::debug!(profile, turn_id, "turn closed");
        Ok(())
    }

    pub fn is_closed(&self, profile: &str, turn_id: TurnId) -> bool {
        if self
            .closed
            .read()
            .contains(&(profile.to_owned(), turn_id))
        {
            return true;
        }
        let on_disk = self
            .turn_dir(profile, turn_id)
            .join(CLOSE_MARKER_FILE)
            .exists();
        if on_disk {
            self.closed
                .write()
                .insert((profile.to_owned(), turn_id));
        }
        on_disk
    }

    /// The close marker, when the turn is closed.
    pub fn close_marker(&self, profile: &str, turn_id: TurnId) -> Option<CloseMarker> {
        let path = self.turn_dir(profile, turn_id).join(CLOSE_MARKER_FILE);
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    // ── Internals ───────────────────────────────────────────────────

    fn ensure_open(&self, profile: &str, turn_id: TurnId) -> Result<()> {
        if self.is_closed(profile, turn_id) {
            return Err(Error::Store(format!(
                "turn {turn_id} for profile '{profile}' is closed"
            )));
        }
        Ok(())
    }

    fn profile_alloc_lock(&self, profile: &str) -> Arc<Mutex<()>> {
        self.alloc_locks
            .lock()
            .entry(profile.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn turn_write_lock(&self, profile: &str, turn_id: TurnId) -> Arc<Mutex<()>> {
        self.turn_locks
            .lock()
            .entry((profile.to_owned(), turn_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Write bytes to `path` via a temp sibling + rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Highest numeric directory name under `turns_dir`, 0 if none.
fn max_existing_id(turns_dir: &Path) -> TurnId {
    let Ok(entries) = std::fs::read_dir(turns_dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse::<TurnId>().ok()))
        .max()
        .unwrap_or(0)
}

/// Keep profile names and artifact names to a single safe path component.
fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, TurnStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TurnStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn open_turn_writes_skeleton() {
        let (_dir, store) = make_store();
        let (turn_id, turn_dir) = store.open_turn("alice").unwrap();
        assert_eq!(turn_id, 1);
        assert!(turn_dir.join("context.md").exists());
        assert!(turn_dir.join("artifacts").is_dir());

        let content = store.read_section("alice", turn_id, Section::Context).unwrap();
        assert!(content.contains("## §0 Query Analysis"));
        assert!(content.contains("## §7 Validation"));
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let (_dir, store) = make_store();
        let (a, _) = store.open_turn("p").unwrap();
        let (b, _) = store.open_turn("p").unwrap();
        let (c, _) = store.open_turn("p").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn ids_are_per_profile() {
        let (_dir, store) = make_store();
        let (a, _) = store.open_turn("alice").unwrap();
        let (b, _) = store.open_turn("bob").unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 1);
    }

    #[test]
    fn concurrent_open_turn_yields_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TurnStore::new(dir.path()).unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let mut ids = Vec::new();
                for _ in 0..5 {
                    ids.push(store.open_turn("race").unwrap().0);
                }
                ids
            }));
        }

        let mut all: Vec<TurnId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let before = all.len();
        all.dedup();
        assert_eq!(all.len(), before, "duplicate turn ids under concurrency");
        assert_eq!(all.len(), 40);
    }

    #[test]
    fn allocator_survives_file_loss_without_reuse() {
        let (_dir, store) = make_store();
        let (a, _) = store.open_turn("p").unwrap();
        std::fs::remove_file(store.turns_dir("p").join(ALLOCATOR_FILE)).unwrap();
        let (b, _) = store.open_turn("p").unwrap();
        assert!(b > a);
    }

    #[test]
    fn append_and_read_research() {
        let (_dir, store) = make_store();
        let (turn_id, _) = store.open_turn("p").unwrap();
        store
            .append_section("p", turn_id, Section::Research, "## Source A\nfindings")
            .unwrap();
        store
            .append_section("p", turn_id, Section::Research, "## Source B")
            .unwrap();
        let text = store.read_section("p", turn_id, Section::Research).unwrap();
        assert!(text.contains("Source A"));
        assert!(text.contains("Source B"));
        assert!(text.find("Source A").unwrap() < text.find("Source B").unwrap());
    }

    #[test]
    fn append_section_rejects_context() {
        let (_dir, store) = make_store();
        let (turn_id, _) = store.open_turn("p").unwrap();
        let err = store
            .append_section("p", turn_id, Section::Context, "x")
            .unwrap_err();
        assert!(err.to_string().contains("subsection"));
    }

    #[test]
    fn subsections_enforce_phase_order() {
        let (_dir, store) = make_store();
        let (turn_id, _) = store.open_turn("p").unwrap();

        store
            .append_subsection("p", turn_id, Phase::Planner, "plan body")
            .unwrap();
        // Same subsection again is fine (synthesis revise case).
        store
            .append_subsection("p", turn_id, Phase::Planner, "plan addendum")
            .unwrap();
        // Opening an earlier, still-empty subsection after a later one is not.
        let err = store
            .append_subsection("p", turn_id, Phase::Analyzer, "late analysis")
            .unwrap_err();
        assert!(err.to_string().contains("cannot be opened"));
    }

    #[test]
    fn revise_may_reappend_synthesis_after_validation() {
        let (_dir, store) = make_store();
        let (turn_id, _) = store.open_turn("p").unwrap();

        store
            .append_subsection("p", turn_id, Phase::Synthesis, "first draft")
            .unwrap();
        store
            .append_subsection("p", turn_id, Phase::Validation, "decision: revise")
            .unwrap();
        // The revise pass appends to §6 again even though §7 exists.
        store
            .append_subsection("p", turn_id, Phase::Synthesis, "revised draft")
            .unwrap();

        let body = store.read_subsection("p", turn_id, Phase::Synthesis).unwrap();
        assert!(body.contains("first draft"));
        assert!(body.contains("revised draft"));
    }

    #[test]
    fn closed_turn_rejects_writes_and_close_is_idempotent() {
        let (_dir, store) = make_store();
        let (turn_id, _) = store.open_turn("p").unwrap();

        store.close_turn("p", turn_id, TurnOutcome::Saved).unwrap();
        store.close_turn("p", turn_id, TurnOutcome::Cancelled).unwrap();

        // First outcome wins.
        let marker = store.close_marker("p", turn_id).unwrap();
        assert!(matches!(marker.outcome, TurnOutcome::Saved));

        let err = store
            .append_section("p", turn_id, Section::ToolResults, "late")
            .unwrap_err();
        assert!(err.to_string().contains("closed"));

        let err = store
            .append_subsection("p", turn_id, Phase::Synthesis, "late")
            .unwrap_err();
        assert!(err.to_string().contains("closed"));

        // Reads still work.
        assert!(store
            .read_section("p", turn_id, Section::Context)
            .unwrap()
            .contains("# Turn"));
    }

    #[test]
    fn failure_marker_carries_kind_and_phase() {
        let (_dir, store) = make_store();
        let (turn_id, _) = store.open_turn("p").unwrap();
        store
            .close_turn(
                "p",
                turn_id,
                TurnOutcome::Failed {
                    kind: "timeout".into(),
                    phase: Some("executor".into()),
                    message: "tool call exceeded budget".into(),
                },
            )
            .unwrap();
        let marker = store.close_marker("p", turn_id).unwrap();
        match marker.outcome {
            TurnOutcome::Failed { kind, phase, .. } => {
                assert_eq!(kind, "timeout");
                assert_eq!(phase.as_deref(), Some("executor"));
            }
            _ => panic!("expected failed marker"),
        }
    }

    #[test]
    fn attach_artifact_sanitizes_name() {
        let (_dir, store) = make_store();
        let (turn_id, _) = store.open_turn("p").unwrap();
        let path = store
            .attach_artifact("p", turn_id, "../escape.png", b"bytes")
            .unwrap();
        assert!(path.starts_with(store.turn_dir("p", turn_id).join("artifacts")));
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), ".._escape.png");
        assert_eq!(std::fs::read(path).unwrap(), b"bytes");
    }

    #[test]
    fn read_missing_section_is_empty() {
        let (_dir, store) = make_store();
        let (turn_id, _) = store.open_turn("p").unwrap();
        let text = store.read_section("p", turn_id, Section::Research).unwrap();
        assert!(text.is_empty());
    }
}
