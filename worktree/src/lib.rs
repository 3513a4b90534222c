//! Detached git worktrees for isolated ticket execution, grounded on the
//! `git2` usage already present in the teacher's churn-analysis module
//! (native git access, no subprocess spawning).

use std::cell::Cell;
use std::path::{Path, PathBuf};

use git2::{build::CheckoutBuilder, Oid, Repository, WorktreeAddOptions};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("base revision {0} did not resolve to a commit")]
    InvalidBase(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, WorktreeError>;

/// Manages worktrees for a single project repository.
pub struct WorktreeManager {
    repo_path: PathBuf,
    worktrees_root: PathBuf,
}

impl WorktreeManager {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        let repo_path = repo_path.into();
        let worktrees_root = repo_path.join(".ratchet").join("worktrees");
        Self {
            repo_path,
            worktrees_root,
        }
    }

    /// Create a detached working copy checked out at `base` (any revspec:
    /// branch, tag, or commit sha).
    pub fn create(&self, base: &str) -> Result<WorktreeHandle> {
        std::fs::create_dir_all(&self.worktrees_root)?;

        let repo = Repository::open(&self.repo_path)?;
        let base_commit = repo
            .revparse_single(base)?
            .peel_to_commit()
            .map_err(|_| WorktreeError::InvalidBase(base.to_string()))?;
        let base_oid = base_commit.id();

        let name = format!("ratchet-{}", uuid::Uuid::new_v4());
        let path = self.worktrees_root.join(&name);

        let mut opts = WorktreeAddOptions::new();
        repo.worktree(&name, &path, Some(&mut opts))?;

        let wt_repo = Repository::open(&path)?;
        wt_repo.set_head_detached(base_oid)?;
        wt_repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

        Ok(WorktreeHandle {
            repo_path: self.repo_path.clone(),
            name,
            path,
            base_oid,
            cleaned: Cell::new(false),
        })
    }
}

/// A detached worktree. `cleanup` runs in `Drop` in addition to being
/// callable explicitly; both paths are idempotent so every exit (normal
/// return, early `?`, or panic unwind) releases the worktree exactly once.
pub struct WorktreeHandle {
    repo_path: PathBuf,
    name: String,
    path: PathBuf,
    base_oid: Oid,
    cleaned: Cell<bool>,
}

impl WorktreeHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_oid(&self) -> Oid {
        self.base_oid
    }

    /// Stage all changes and create a commit on top of the worktree's
    /// current `HEAD`.
    pub fn commit(&self, message: &str) -> Result<Oid> {
        let repo = Repository::open(&self.path)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;

        let parent = repo.head()?.peel_to_commit()?;
        let signature = repo.signature().or_else(|_| {
            git2::Signature::now("ratchet", "ratchet@localhost")
        })?;

        let oid = repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&parent],
        )?;
        Ok(oid)
    }

    /// Push the worktree's current `HEAD` to `branch` on `origin`, using
    /// whatever credential helper / ssh-agent the environment provides.
    pub fn push(&self, branch: &str) -> Result<()> {
        let repo = Repository::open(&self.path)?;
        let mut remote = repo.find_remote("origin")?;

        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.credentials(|_url, username_from_url, _allowed_types| {
            git2::Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
        });

        let mut push_opts = git2::PushOptions::new();
        push_opts.remote_callbacks(callbacks);

        let refspec = format!("HEAD:refs/heads/{branch}");
        remote.push(&[&refspec], Some(&mut push_opts))?;
        Ok(())
    }

    /// Remove the worktree's directory and prune its git metadata.
    /// Idempotent: calling it twice (explicitly, then again via `Drop`) is
    /// a no-op the second time.
    pub fn cleanup(&self) {
        if self.cleaned.replace(true) {
            return;
        }

        if self.path.exists() {
            if let Err(err) = std::fs::remove_dir_all(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove worktree directory");
            }
        }

        match Repository::open(&self.repo_path).and_then(|repo| repo.find_worktree(&self.name)) {
            Ok(wt) => {
                let mut opts = git2::WorktreePruneOptions::new();
                opts.valid(true).locked(true).working_tree(true);
                if let Err(err) = wt.prune(Some(&mut opts)) {
                    tracing::warn!(name = %self.name, error = %err, "failed to prune worktree metadata");
                }
            }
            Err(err) => {
                tracing::warn!(name = %self.name, error = %err, "worktree metadata already gone");
            }
        }
    }
}

impl Drop for WorktreeHandle {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo_with_commit(dir: &Path) -> Oid {
        let repo = Repository::init(dir).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        std::fs::write(dir.join("README.md"), b"hello").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();

        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap()
    }

    #[test]
    fn create_checks_out_detached_at_base() {
        let dir = tempfile::tempdir().unwrap();
        let base_oid = init_repo_with_commit(dir.path());

        let manager = WorktreeManager::new(dir.path());
        let handle = manager.create("HEAD").unwrap();

        assert_eq!(handle.base_oid(), base_oid);
        assert!(handle.path().join("README.md").exists());
    }

    #[test]
    fn cleanup_is_idempotent_and_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());

        let manager = WorktreeManager::new(dir.path());
        let handle = manager.create("HEAD").unwrap();
        let path = handle.path().to_path_buf();

        handle.cleanup();
        handle.cleanup();

        assert!(!path.exists());
    }

    #[test]
    fn drop_cleans_up_worktree_directory() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());

        let manager = WorktreeManager::new(dir.path());
        let path = {
            let handle = manager.create("HEAD").unwrap();
            handle.path().to_path_buf()
        };

        assert!(!path.exists());
    }

    #[test]
    fn commit_creates_new_oid_on_top_of_head() {
        let dir = tempfile::tempdir().unwrap();
        let base_oid = init_repo_with_commit(dir.path());

        let manager = WorktreeManager::new(dir.path());
        let handle = manager.create("HEAD").unwrap();

        std::fs::write(handle.path().join("NEW.txt"), b"content").unwrap();
        let new_oid = handle.commit("add file").unwrap();

        assert_ne!(new_oid, base_oid);
    }
}
