//! Scope enforcement: every file the agent touched must fall inside the
//! ticket's allowed paths and outside its forbidden paths, checked against
//! the glob patterns `wildmatch` supports (the same library the proposal
//! pipeline's scope filter uses).

use wildmatch::WildMatch;

fn matches_any(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| WildMatch::new(p).matches(path) || path.starts_with(p.trim_end_matches("/**")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeViolation {
    pub path: String,
    pub reason: ScopeViolationReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeViolationReason {
    NotAllowed,
    Forbidden,
}

/// Check every changed file against `allowed`/`forbidden`. An empty
/// `allowed` list means no restriction beyond `forbidden`.
pub fn check_scope(changed_files: &[String], allowed: &[String], forbidden: &[String]) -> Vec<ScopeViolation> {
    changed_files
        .iter()
        .filter_map(|path| {
            if matches_any(path, forbidden) {
                return Some(ScopeViolation { path: path.clone(), reason: ScopeViolationReason::Forbidden });
            }
            if !allowed.is_empty() && !matches_any(path, allowed) {
                return Some(ScopeViolation { path: path.clone(), reason: ScopeViolationReason::NotAllowed });
            }
            None
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_outside_allowed_paths_is_a_violation() {
        let violations = check_scope(&["src/other.rs".to_string()], &["src/http.rs".to_string()], &[]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].reason, ScopeViolationReason::NotAllowed);
    }

    #[test]
    fn forbidden_path_is_a_violation_even_if_allowed_is_empty() {
        let violations = check_scope(&["secrets/key.pem".to_string()], &[], &["secrets/**".to_string()]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].reason, ScopeViolationReason::Forbidden);
    }

    #[test]
    fn glob_allowed_path_matches_nested_files() {
        let violations = check_scope(&["src/http/client.rs".to_string()], &["src/http/**".to_string()], &[]);
        assert!(violations.is_empty());
    }

    #[test]
    fn no_restriction_when_allowed_is_empty_and_not_forbidden() {
        let violations = check_scope(&["anything.rs".to_string()], &[], &[]);
        assert!(violations.is_empty());
    }
}
