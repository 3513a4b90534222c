//! Path resolution for agent-invoked tools. Every `read_file`/`write_file`
//! call is validated against the worktree root before touching disk: the
//! logical path is canonicalized and rejected outright if it escapes the
//! root, and any symlink along the way is resolved and re-checked so a
//! symlink planted inside the worktree can't point the write outside it.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathGuardError {
    #[error("path escapes worktree root: {0}")]
    Escapes(String),

    #[error("path does not exist and has no existing parent: {0}")]
    NoResolvableParent(String),
}

/// Resolve `logical_path` (as given by the agent, relative or absolute)
/// against `worktree_root`, returning an absolute path guaranteed to live
/// inside the root.
///
/// For an existing path this canonicalizes it directly (following
/// symlinks) and checks containment. For a path that doesn't exist yet
/// (a `write_file` target), it canonicalizes the nearest existing
/// ancestor and rejoins the remaining components, so a write can't be
/// redirected outside the root via a symlinked parent directory either.
pub fn resolve_path(worktree_root: &Path, logical_path: &str) -> Result<PathBuf, PathGuardError> {
    let root = worktree_root
        .canonicalize()
        .map_err(|_| PathGuardError::Escapes(worktree_root.display().to_string()))?;

    let candidate = if Path::new(logical_path).is_absolute() {
        PathBuf::from(logical_path)
    } else {
        root.join(logical_path)
    };

    if let Ok(canonical) = candidate.canonicalize() {
        return ensure_within(&root, &canonical);
    }

    // Target doesn't exist yet: walk up to the nearest existing ancestor,
    // canonicalize that, then rejoin the missing tail.
    let mut existing = candidate.clone();
    let mut tail = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        match existing.file_name() {
            Some(name) => {
                tail.push(name.to_owned());
                existing = existing
                    .parent()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| PathGuardError::NoResolvableParent(logical_path.to_string()))?;
            }
            None => return Err(PathGuardError::NoResolvableParent(logical_path.to_string())),
        }
    }

    let canonical_existing = existing
        .canonicalize()
        .map_err(|_| PathGuardError::NoResolvableParent(logical_path.to_string()))?;
    ensure_within(&root, &canonical_existing)?;

    let mut result = canonical_existing;
    for component in tail.into_iter().rev() {
        result.push(component);
    }
    Ok(result)
}

fn ensure_within(root: &Path, candidate: &Path) -> Result<PathBuf, PathGuardError> {
    if candidate.starts_with(root) {
        Ok(candidate.to_path_buf())
    } else {
        Err(PathGuardError::Escapes(candidate.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_inside_root_resolves() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();

        let resolved = resolve_path(dir.path(), "a.txt").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("a.txt"));
    }

    #[test]
    fn dot_dot_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let err = resolve_path(dir.path(), "sub/../../etc/passwd").unwrap_err();
        assert!(matches!(err, PathGuardError::Escapes(_)));
    }

    #[test]
    fn nonexistent_write_target_resolves_under_existing_parent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let resolved = resolve_path(dir.path(), "sub/new_file.txt").unwrap();
        assert_eq!(
            resolved,
            dir.path().canonicalize().unwrap().join("sub").join("new_file.txt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let err = resolve_path(dir.path(), "escape/secret.txt").unwrap_err();
        assert!(matches!(err, PathGuardError::Escapes(_)));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_file_resolving_outside_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("target.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("target.txt"),
            dir.path().join("link.txt"),
        )
        .unwrap();

        let err = resolve_path(dir.path(), "link.txt").unwrap_err();
        assert!(matches!(err, PathGuardError::Escapes(_)));
    }
}
