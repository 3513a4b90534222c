//! Preflight checks (§6, §7 `preflight_failed`): `git` and `gh` must be on
//! `PATH` before any session starts, checked by actually invoking
//! `--version` rather than just searching `PATH` so a broken shim still
//! fails loudly.

use std::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error("required tool '{0}' is not available on PATH")]
    MissingTool(&'static str),
}

fn binary_works(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Checked once before a session starts. `gh` is only required when PR
/// creation isn't explicitly skipped, but this engine never skips it
/// outright (§6's exit-code-2 contract applies to both regardless), so
/// both are always verified.
pub fn check() -> Result<(), PreflightError> {
    if !binary_works("git") {
        return Err(PreflightError::MissingTool("git"));
    }
    if !binary_works("gh") {
        return Err(PreflightError::MissingTool("gh"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_is_reported_by_name() {
        assert!(!binary_works("definitely-not-a-real-binary-xyz"));
    }
}
