//! Builds the scout prompt (sector focus, dedup "already completed" block,
//! relevant learnings, trajectory focus) and parses the scout agent's JSON
//! response against the `{proposals: [...]}` schema required by §6.

use std::time::Duration;

use ratchet_agent::{AgentBackend, AgentRequest};
use ratchet_types::proposal::ProposalBatch;
use ratchet_types::{Proposal, Sector};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct ScoutPromptContext {
    pub sector: Option<Sector>,
    pub dedup_block: String,
    pub learnings_block: String,
    pub trajectory_focus: Option<String>,
    pub formula: String,
    pub categories: Vec<String>,
    pub min_confidence: u8,
    pub min_impact: u8,
    pub hints: Vec<String>,
}

/// Assembles the scout turn's prompt. Section order mirrors
/// `ratchet_tickets::prompt::build_execute_prompt`: task framing first,
/// then narrowing constraints, then memory, so every backend sees a
/// consistent turn shape regardless of formula.
pub fn build_scout_prompt(ctx: &ScoutPromptContext) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Task\n");
    prompt.push_str("Scan the assigned sector for improvement opportunities and return a JSON object matching {\"proposals\": [...]}.\n\n");

    prompt.push_str("## Scope\n");
    if let Some(sector) = &ctx.sector {
        prompt.push_str(&format!("sector: {} ({})\n", sector.path, sector.inferred_purpose));
        if sector.confidence == ratchet_types::Classification::Low {
            prompt.push_str("note: low-confidence sector classification, raise your own confidence floor accordingly\n");
        }
    } else {
        prompt.push_str("sector: whole repository\n");
    }
    prompt.push_str(&format!("formula: {}\n", ctx.formula));
    if !ctx.categories.is_empty() {
        prompt.push_str(&format!("allowed categories: {}\n", ctx.categories.join(", ")));
    }
    prompt.push_str(&format!("minimum confidence: {}\n", ctx.min_confidence));
    prompt.push_str(&format!("minimum impact score: {}\n", ctx.min_impact));
    if !ctx.hints.is_empty() {
        prompt.push_str(&format!("hints: {}\n", ctx.hints.join("; ")));
    }
    if let Some(focus) = &ctx.trajectory_focus {
        prompt.push_str(&format!("strategic focus: {focus}\n"));
    }
    prompt.push('\n');

    if !ctx.dedup_block.is_empty() {
        prompt.push_str("## Already completed, do not repropose\n");
        prompt.push_str(&ctx.dedup_block);
        prompt.push('\n');
    }

    if !ctx.learnings_block.is_empty() {
        prompt.push_str("## Relevant learnings from past runs\n");
        prompt.push_str(&ctx.learnings_block);
        prompt.push('\n');
    }

    prompt
}

#[derive(Debug, thiserror::Error)]
pub enum ScoutError {
    #[error("scout agent failed: {0}")]
    Agent(String),
    #[error("scout response did not parse as the proposal schema: {0}")]
    Parse(String),
}

/// Runs one scout turn and parses its JSON response. A response that
/// isn't valid JSON, or doesn't match the schema, is a parse error rather
/// than a session-fatal one (§9: validation failure is an ordinary error,
/// never a silent termination) — callers treat it the same as an empty
/// result and let the retry/advance-sector logic in `scout_transition`
/// take over.
pub async fn run_scout(
    backend: &dyn AgentBackend,
    worktree_path: &std::path::Path,
    prompt: String,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<Proposal>, ScoutError> {
    let request = AgentRequest { timeout, ..AgentRequest::new(worktree_path, prompt) };
    let outcome = backend.run(&request, cancel).await.map_err(|e| ScoutError::Agent(e.to_string()))?;
    if !outcome.success {
        return Err(ScoutError::Agent(outcome.error.unwrap_or_else(|| "scout exited non-zero".to_string())));
    }
    let json_start = outcome.stdout.find('{').unwrap_or(0);
    let batch: ProposalBatch =
        serde_json::from_str(outcome.stdout[json_start..].trim()).map_err(|e| ScoutError::Parse(e.to_string()))?;
    Ok(batch.proposals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_sector_and_scope_constraints() {
        let ctx = ScoutPromptContext {
            sector: Some(Sector::new("src/api", "api")),
            formula: "balanced".to_string(),
            min_confidence: 70,
            min_impact: 4,
            ..Default::default()
        };
        let prompt = build_scout_prompt(&ctx);
        assert!(prompt.contains("sector: src/api"));
        assert!(prompt.contains("minimum confidence: 70"));
    }

    #[test]
    fn prompt_without_sector_scopes_to_whole_repo() {
        let ctx = ScoutPromptContext::default();
        let prompt = build_scout_prompt(&ctx);
        assert!(prompt.contains("whole repository"));
    }
}
