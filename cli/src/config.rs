//! Session/QA configuration loaded from `<project_root>/.ratchet/config.toml`,
//! grounded on the teacher's `config_loader`/`config_types` split but
//! narrowed to this engine's own knobs (formula, scope, backend, budgets).
//! Absent or partial config falls back to sane defaults rather than
//! failing preflight — only a malformed file is a `config_invalid` error.

use std::path::Path;
use std::time::Duration;

use ratchet_phases::SessionBudgets;
use ratchet_spindle::SpindleConfig;
use ratchet_tickets::QaConfig;
use serde::{Deserialize, Serialize};

/// Which external CLI drives the agent backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Claude,
    Codex,
    Hybrid,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Claude
    }
}

impl BackendKind {
    /// Scout fan-out concurrency default per §5: 3 for Claude-style, 4 for
    /// Codex-style. `Hybrid` uses the execute backend's own cap, since its
    /// scout calls are routed through whichever of the two is configured
    /// for that role.
    pub fn default_scout_concurrency(self) -> usize {
        match self {
            BackendKind::Claude | BackendKind::Hybrid => 3,
            BackendKind::Codex => 4,
        }
    }

    pub fn scout_binary(self) -> &'static str {
        match self {
            BackendKind::Claude | BackendKind::Hybrid => "claude",
            BackendKind::Codex => "codex",
        }
    }

    pub fn execute_binary(self) -> &'static str {
        match self {
            BackendKind::Claude => "claude",
            BackendKind::Codex | BackendKind::Hybrid => "codex",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub formula: String,
    pub scope_globs: Vec<String>,
    pub categories: Vec<String>,
    pub min_confidence: u8,
    pub min_impact: u8,
    pub max_proposals: u32,
    pub backend: BackendKind,
    pub concurrency: u32,
    pub parallel_width: u32,
    pub continuous_mode: bool,
    pub draft_prs: bool,
    pub gh_binary: String,
    pub max_plan_rejections: u32,
    pub qa_retry_cap: u32,
    pub spindle_recovery_cap: u32,
    pub max_lines_per_ticket: u32,
    pub max_prs: u32,
    pub max_scout_cycles: u32,
    pub max_session_steps: u64,
    pub max_ticket_steps: u64,
    pub wall_clock_secs: u64,
    pub skip_review: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            formula: "balanced".to_string(),
            scope_globs: Vec::new(),
            categories: Vec::new(),
            min_confidence: 60,
            min_impact: 3,
            max_proposals: 10,
            backend: BackendKind::default(),
            concurrency: 3,
            parallel_width: 1,
            continuous_mode: false,
            draft_prs: false,
            gh_binary: "gh".to_string(),
            max_plan_rejections: 3,
            qa_retry_cap: 1,
            spindle_recovery_cap: 2,
            max_lines_per_ticket: 800,
            max_prs: 20,
            max_scout_cycles: 30,
            max_session_steps: 500,
            max_ticket_steps: 60,
            wall_clock_secs: 4 * 60 * 60,
            skip_review: false,
        }
    }
}

impl EngineConfig {
    /// Loads `<state_dir>/config.toml`, returning defaults if the file is
    /// simply absent. A present-but-unparsable file is a `config_invalid`
    /// error — never silently ignored, unlike the JSON state files, whose
    /// corruption-tolerance policy (§9) is specific to cross-session
    /// memory, not to this explicit operator-authored file.
    pub fn load(state_dir: &Path) -> anyhow::Result<Self> {
        let path = state_dir.join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("config.toml at {} is invalid: {e}", path.display()))
    }

    pub fn session_budgets(&self) -> SessionBudgets {
        SessionBudgets {
            max_session_steps: self.max_session_steps,
            max_ticket_steps: self.max_ticket_steps,
            max_lines_changed: self.max_lines_per_ticket as u64 * self.max_prs as u64,
            max_tool_calls_per_ticket: 80,
            max_prs: self.max_prs,
            max_scout_cycles: self.max_scout_cycles,
            wall_clock: Duration::from_secs(self.wall_clock_secs),
        }
    }

    pub fn qa_config(&self) -> QaConfig {
        QaConfig::default()
    }

    pub fn spindle_config(&self) -> SpindleConfig {
        SpindleConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.formula, "balanced");
        assert_eq!(config.backend, BackendKind::Claude);
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "not = [valid toml").unwrap();
        assert!(EngineConfig::load(dir.path()).is_err());
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "formula = \"deep\"\nmax_prs = 5\n").unwrap();
        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.formula, "deep");
        assert_eq!(config.max_prs, 5);
        assert_eq!(config.min_confidence, 60);
    }
}
