//! The `.ratchet/` persistent layout (§6): one directory per project root,
//! holding the SQLite store, per-project JSON memory files, and a
//! `runs/<run_id>/` directory per session.

use std::path::{Path, PathBuf};

pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Anchors state under `<project_root>/.ratchet`, creating it (and the
    /// `runs/`, `formulas/`, `trajectories/`, `reports/` subdirectories) if
    /// absent.
    pub fn open(project_root: &Path) -> std::io::Result<Self> {
        let root = project_root.join(".ratchet");
        std::fs::create_dir_all(&root)?;
        for sub in ["runs", "formulas", "trajectories", "reports"] {
            std::fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("state.sqlite")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn dedup_path(&self) -> PathBuf {
        self.root.join("dedup-memory.json")
    }

    pub fn learnings_path(&self) -> PathBuf {
        self.root.join("learnings.json")
    }

    pub fn sectors_path(&self) -> PathBuf {
        self.root.join("sectors.json")
    }

    pub fn hints_path(&self) -> PathBuf {
        self.root.join("hints.json")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_expected_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::open(dir.path()).unwrap();
        assert!(state.runs_dir().is_dir());
        assert!(state.reports_dir().is_dir());
        assert_eq!(state.root(), dir.path().join(".ratchet"));
    }
}
