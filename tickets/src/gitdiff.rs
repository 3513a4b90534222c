//! Small git2 helpers for reading back what the agent changed in a
//! worktree, without shelling out to `git diff`/`git status`.

use std::path::Path;

use git2::{DiffFormat, DiffOptions, Repository, StatusOptions};

/// Paths (relative to the worktree root) with any working-tree change:
/// modified, new (including untracked), deleted, or renamed.
pub fn changed_files(worktree_path: &Path) -> Result<Vec<String>, git2::Error> {
    let repo = Repository::open(worktree_path)?;
    let mut opts = StatusOptions::new();
    opts.include_untracked(true).recurse_untracked_dirs(true);
    let statuses = repo.statuses(Some(&mut opts))?;
    Ok(statuses.iter().filter_map(|entry| entry.path().map(str::to_string)).collect())
}

/// Total inserted + deleted lines in the working tree against the index,
/// used by the phase machine's per-ticket line budget (§4.11 `Execute →
/// Qa` validation).
pub fn changed_line_count(worktree_path: &Path) -> Result<u32, git2::Error> {
    let repo = Repository::open(worktree_path)?;
    let mut opts = DiffOptions::new();
    opts.include_untracked(true);
    let diff = repo.diff_index_to_workdir(None, Some(&mut opts))?;
    let stats = diff.stats()?;
    Ok((stats.insertions() + stats.deletions()) as u32)
}

/// Unified diff text of the working tree against the index, fed to the
/// spindle detector as the iteration's "diff" signal.
pub fn workdir_diff_text(worktree_path: &Path) -> Result<String, git2::Error> {
    let repo = Repository::open(worktree_path)?;
    let mut opts = DiffOptions::new();
    opts.include_untracked(true);
    let diff = repo.diff_index_to_workdir(None, Some(&mut opts))?;

    let mut buf = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if let Ok(text) = std::str::from_utf8(line.content()) {
            buf.push_str(text);
        }
        true
    })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) {
        let repo = Repository::init(dir).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        std::fs::write(dir.join("a.txt"), "hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("a.txt")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
    }

    #[test]
    fn changed_files_reports_modified_and_untracked() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "hello again\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "new file\n").unwrap();

        let mut files = changed_files(dir.path()).unwrap();
        files.sort();
        assert_eq!(files, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn clean_worktree_has_no_changed_files() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        assert!(changed_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn changed_line_count_sums_insertions_and_deletions() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "changed content\nextra line\n").unwrap();

        let count = changed_line_count(dir.path()).unwrap();
        assert!(count >= 2);
    }

    #[test]
    fn diff_text_mentions_changed_content() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "changed content\n").unwrap();

        let diff = workdir_diff_text(dir.path()).unwrap();
        assert!(diff.contains("changed content"));
    }
}
