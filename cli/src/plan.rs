//! Plan-phase prompt and validation (§4.11 `Plan → Execute | Plan`): a
//! plan is accepted only if every file it names falls inside the
//! ticket's allowed-path scope and its estimated line count doesn't
//! exceed the per-ticket budget.

use std::time::Duration;

use ratchet_agent::{AgentBackend, AgentRequest};
use ratchet_types::{CommitPlan, Ticket};
use tokio_util::sync::CancellationToken;
use wildmatch::WildMatch;

pub fn build_plan_prompt(ticket: &Ticket) -> String {
    let mut prompt = String::new();
    prompt.push_str("## Task\n");
    prompt.push_str("Produce a commit plan for the following ticket as JSON matching ");
    prompt.push_str("{ticket_id, files_to_touch: [{path, reason, action}], expected_tests, risk_level, estimated_lines}.\n\n");
    prompt.push_str(&format!("ticket_id: {}\n", ticket.id));
    prompt.push_str(&format!("title: {}\n", ticket.title));
    prompt.push_str(&format!("description: {}\n", ticket.description));
    prompt.push_str(&format!("allowed paths: {}\n", ticket.allowed_paths.join(", ")));
    prompt
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("plan agent failed: {0}")]
    Agent(String),
    #[error("plan response did not parse: {0}")]
    Parse(String),
}

pub async fn run_plan_agent(
    backend: &dyn AgentBackend,
    worktree_path: &std::path::Path,
    ticket: &Ticket,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommitPlan, PlanError> {
    let prompt = build_plan_prompt(ticket);
    let request = AgentRequest { timeout, ..AgentRequest::new(worktree_path, prompt) };
    let outcome = backend.run(&request, cancel).await.map_err(|e| PlanError::Agent(e.to_string()))?;
    if !outcome.success {
        return Err(PlanError::Agent(outcome.error.unwrap_or_else(|| "plan agent exited non-zero".to_string())));
    }
    let json_start = outcome.stdout.find('{').unwrap_or(0);
    serde_json::from_str(outcome.stdout[json_start..].trim()).map_err(|e| PlanError::Parse(e.to_string()))
}

/// Whether `plan` stays inside `ticket`'s scope and its line estimate
/// fits `max_lines`. Both conditions must hold for the plan to be
/// approved; the first failing reason is returned for the rejection
/// message logged back to the plan agent on the next attempt.
pub fn validate_plan(plan: &CommitPlan, ticket: &Ticket, max_lines: u32) -> Result<(), String> {
    if ticket.allowed_paths.is_empty() {
        // No explicit scope means any path is in-scope.
    } else {
        for path in plan.touched_paths() {
            let in_scope = ticket.allowed_paths.iter().any(|glob| WildMatch::new(glob).matches(path));
            if !in_scope {
                return Err(format!("{path} is outside the ticket's allowed scope"));
            }
        }
    }
    if plan.estimated_lines > max_lines {
        return Err(format!("estimated {} lines exceeds the {max_lines}-line budget", plan.estimated_lines));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_types::{FileAction, PlannedFile, TicketCategory};
    use uuid::Uuid;

    fn ticket() -> Ticket {
        Ticket::new(Uuid::new_v4(), "Remove unused import", TicketCategory::Refactor, vec!["src/**".to_string()])
    }

    fn plan_for(ticket: &Ticket, path: &str, lines: u32) -> CommitPlan {
        CommitPlan {
            ticket_id: ticket.id,
            files_to_touch: vec![PlannedFile { path: path.to_string(), action: FileAction::Modify, reason: "cleanup".to_string() }],
            expected_tests: vec!["npm test".to_string()],
            risk_level: "low".to_string(),
            estimated_lines: lines,
        }
    }

    #[test]
    fn plan_within_scope_and_budget_is_approved() {
        let ticket = ticket();
        let plan = plan_for(&ticket, "src/utils.ts", 5);
        assert!(validate_plan(&plan, &ticket, 800).is_ok());
    }

    #[test]
    fn plan_touching_out_of_scope_file_is_rejected() {
        let ticket = ticket();
        let plan = plan_for(&ticket, "test/b.ts", 5);
        assert!(validate_plan(&plan, &ticket, 800).is_err());
    }

    #[test]
    fn plan_over_line_budget_is_rejected() {
        let ticket = ticket();
        let plan = plan_for(&ticket, "src/utils.ts", 5000);
        assert!(validate_plan(&plan, &ticket, 800).is_err());
    }
}
