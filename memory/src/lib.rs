//! Decaying, file-persisted scout memory: duplicate-title suppression
//! ([`dedup`]), cross-session learnings ([`learnings`]), and codebase
//! sector rotation ([`sectors`]). All three modules keep their
//! scoring/decay/consolidation logic pure; [`DedupStore`],
//! [`LearningsStore`] and [`SectorsStore`] are the thin, advisory-lock-
//! guarded wrappers that load and atomically save the JSON each pure
//! function operates on.

pub mod dedup;
pub mod learnings;
pub mod sectors;

use std::path::{Path, PathBuf};

use chrono::Utc;
use ratchet_types::{DedupEntry, Learning, Sector};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

/// Write `value` to `path` atomically: serialize to a sibling temp file,
/// then `rename` over the target so a reader never observes a partial
/// write.
fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), MemoryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| MemoryError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(value).map_err(|e| MemoryError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    std::fs::write(&tmp_path, json).map_err(|e| MemoryError::Write {
        path: tmp_path.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|e| MemoryError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

fn load_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T, MemoryError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| MemoryError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&contents).map_err(|e| MemoryError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Advisory-lock-guarded dedup memory for one project. Loaded once per
/// session; `save` is the only write path and goes through
/// [`ratchet_filelock::acquire`] so concurrent sessions on the same
/// project don't clobber each other.
pub struct DedupStore {
    path: PathBuf,
    entries: Vec<DedupEntry>,
}

impl DedupStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let path = path.into();
        let _guard = ratchet_filelock::acquire(&path).ok();
        let entries: Vec<DedupEntry> = load_json(&path)?;
        Ok(Self { path, entries })
    }

    pub fn entries(&self) -> &[DedupEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut Vec<DedupEntry> {
        &mut self.entries
    }

    pub fn apply_decay(&mut self) {
        dedup::apply_default_decay(&mut self.entries, Utc::now());
    }

    pub fn record(&mut self, title: &str, completed: bool) {
        dedup::record_entry(&mut self.entries, title, completed);
    }

    pub fn is_duplicate(&self, title: &str) -> bool {
        dedup::is_duplicate(title, &self.entries, dedup::DEFAULT_THRESHOLD)
    }

    pub fn save(&self) -> Result<(), MemoryError> {
        let _guard = ratchet_filelock::acquire(&self.path).ok();
        atomic_write_json(&self.path, &self.entries)
    }
}

/// Advisory-lock-guarded learnings store for one project.
pub struct LearningsStore {
    path: PathBuf,
    learnings: Vec<Learning>,
}

impl LearningsStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let path = path.into();
        let _guard = ratchet_filelock::acquire(&path).ok();
        let learnings: Vec<Learning> = load_json(&path)?;
        Ok(Self { path, learnings })
    }

    pub fn learnings(&self) -> &[Learning] {
        &self.learnings
    }

    pub fn push(&mut self, learning: Learning) {
        self.learnings.push(learning);
    }

    pub fn apply_decay(&mut self) {
        learnings::apply_default_decay(&mut self.learnings, Utc::now());
    }

    /// Consolidate in place once the store has grown past `threshold`.
    pub fn consolidate(&mut self, threshold: usize) {
        let taken = std::mem::take(&mut self.learnings);
        self.learnings = learnings::consolidate(taken, threshold);
    }

    pub fn save(&self) -> Result<(), MemoryError> {
        let _guard = ratchet_filelock::acquire(&self.path).ok();
        atomic_write_json(&self.path, &self.learnings)
    }
}

/// Advisory-lock-guarded sector state for one project. Holds the
/// versioned on-disk shape directly so a version bump or corrupt file
/// falls back to an empty, to-be-rebuilt sector list rather than erroring.
pub struct SectorsStore {
    path: PathBuf,
    cycle: u64,
    sectors: Vec<Sector>,
}

impl SectorsStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let _guard = ratchet_filelock::acquire(&path).ok();
        let file: sectors::SectorFile = load_json(&path).unwrap_or_default();
        if file.version != sectors::CURRENT_VERSION {
            return Self { path, cycle: 0, sectors: Vec::new() };
        }
        Self { path, cycle: file.cycle, sectors: file.sectors }
    }

    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Re-index `project_root` and merge the fresh scan into preserved
    /// counters. Call once per session startup, or whenever the on-disk
    /// sector list came back empty (fresh project or version bump).
    pub fn refresh(&mut self, project_root: &Path) {
        let fresh = sectors::index_codebase(project_root);
        let existing = std::mem::take(&mut self.sectors);
        self.sectors = sectors::merge_refresh(existing, fresh);
    }

    /// Pick the next sector to scout, advancing the rotation cycle once
    /// every sector has been visited this round.
    pub fn next_scope(&mut self) -> Option<String> {
        if sectors::get_next_scope(&self.sectors, self.cycle).is_none() {
            self.cycle += 1;
        }
        sectors::get_next_scope(&self.sectors, self.cycle).map(|s| s.path.clone())
    }

    /// Record the outcome of having just scouted `path`: bumps its scan
    /// count and rolls `proposals_found` into its yield estimate.
    pub fn record_scan(&mut self, path: &str, proposals_found: u32) {
        if let Some(sector) = self.sectors.iter_mut().find(|s| s.path == path) {
            sectors::record_scan(sector, self.cycle, proposals_found);
        }
    }

    pub fn record_category_outcome(&mut self, path: &str, category: &str, success: bool) {
        if let Some(sector) = self.sectors.iter_mut().find(|s| s.path == path) {
            sectors::record_category_outcome(sector, category, success);
        }
    }

    pub fn save(&self) -> Result<(), MemoryError> {
        let _guard = ratchet_filelock::acquire(&self.path).ok();
        let file = sectors::SectorFile {
            version: sectors::CURRENT_VERSION,
            cycle: self.cycle,
            sectors: self.sectors.clone(),
        };
        atomic_write_json(&self.path, &file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup.json");

        let mut store = DedupStore::load(&path).unwrap();
        assert!(store.entries().is_empty());
        store.record("Add retry logic", false);
        store.save().unwrap();

        let reloaded = DedupStore::load(&path).unwrap();
        assert_eq!(reloaded.entries().len(), 1);
        assert_eq!(reloaded.entries()[0].title, "Add retry logic");
    }

    #[test]
    fn learnings_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("learnings.json");

        let mut store = LearningsStore::load(&path).unwrap();
        store.push(Learning::new(
            "flaky retry under load",
            ratchet_types::LearningCategory::Gotcha,
            ratchet_types::SourceTag::QaFailure,
        ));
        store.save().unwrap();

        let reloaded = LearningsStore::load(&path).unwrap();
        assert_eq!(reloaded.learnings().len(), 1);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::load(dir.path().join("does_not_exist.json")).unwrap();
        assert!(store.entries().is_empty());
    }

    #[test]
    fn sectors_store_refreshes_and_round_trips_through_disk() {
        let project = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(project.path().join("src/api")).unwrap();
        std::fs::write(project.path().join("src/api/mod.rs"), "pub fn handler() {}").unwrap();

        let state_path = project.path().join("sectors.json");
        let mut store = SectorsStore::load(&state_path);
        assert!(store.sectors().is_empty());

        store.refresh(project.path());
        assert!(store.sectors().iter().any(|s| s.path.contains("api")));
        store.save().unwrap();

        let reloaded = SectorsStore::load(&state_path);
        assert_eq!(reloaded.sectors().len(), store.sectors().len());
        assert_eq!(reloaded.cycle(), store.cycle());
    }

    #[test]
    fn sectors_store_version_mismatch_forces_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sectors.json");
        std::fs::write(&path, r#"{"version":999,"cycle":4,"sectors":[]}"#).unwrap();

        let store = SectorsStore::load(&path);
        assert_eq!(store.cycle(), 0);
        assert!(store.sectors().is_empty());
    }
}
