//! Builds the single execute-agent prompt for a ticket. Grounded on the
//! teacher's prompt-assembly style (static guideline text plus
//! interpolated per-task sections) — only the sections and their order are
//! fixed here; no verbatim wording from any formula is baked in.

use ratchet_types::Ticket;

/// Everything the caller precomputed that isn't derivable from the
/// ticket itself: relevant learnings, the dedup "already tried" block,
/// and a short complexity note from the sector's difficulty rating.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub guidelines: String,
    pub learnings_block: String,
    pub dedup_block: String,
    pub complexity_preamble: String,
}

/// Assemble the execute-agent prompt: task, guidelines, learnings,
/// metadata, complexity preamble, allowed/forbidden paths, then
/// verification commands — in that fixed order, so every backend sees a
/// consistently structured turn regardless of which formula picked the
/// ticket.
pub fn build_execute_prompt(ticket: &Ticket, ctx: &PromptContext) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Task\n");
    prompt.push_str(&format!("{}\n\n", ticket.title));
    prompt.push_str(&format!("{}\n\n", ticket.description));

    if !ctx.guidelines.is_empty() {
        prompt.push_str("## Guidelines\n");
        prompt.push_str(&ctx.guidelines);
        prompt.push_str("\n\n");
    }

    if !ctx.learnings_block.is_empty() {
        prompt.push_str("## Relevant learnings from past runs\n");
        prompt.push_str(&ctx.learnings_block);
        prompt.push('\n');
    }

    if !ctx.dedup_block.is_empty() {
        prompt.push_str("## Already attempted, do not repeat\n");
        prompt.push_str(&ctx.dedup_block);
        prompt.push('\n');
    }

    prompt.push_str("## Metadata\n");
    prompt.push_str(&format!("category: {:?}\n", ticket.category));
    prompt.push_str(&format!("priority: {}\n", ticket.priority));
    prompt.push_str(&format!("retry: {}/{}\n\n", ticket.retry_count, ticket.max_retries));

    if !ctx.complexity_preamble.is_empty() {
        prompt.push_str(&ctx.complexity_preamble);
        prompt.push_str("\n\n");
    }

    prompt.push_str("## Allowed paths\n");
    for path in &ticket.allowed_paths {
        prompt.push_str(&format!("- {path}\n"));
    }
    if !ticket.forbidden_paths.is_empty() {
        prompt.push_str("\n## Forbidden paths (never touch)\n");
        for path in &ticket.forbidden_paths {
            prompt.push_str(&format!("- {path}\n"));
        }
    }

    if !ticket.verification_commands.is_empty() {
        prompt.push_str("\n## Verification commands that must pass\n");
        for command in &ticket.verification_commands {
            prompt.push_str(&format!("- {command}\n"));
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_types::TicketCategory;
    use uuid::Uuid;

    #[test]
    fn prompt_includes_task_paths_and_verification_commands() {
        let mut ticket = Ticket::new(Uuid::new_v4(), "Fix retry bug", TicketCategory::Fix, vec!["src/http.rs".to_string()]);
        ticket.verification_commands = vec!["cargo test".to_string()];

        let prompt = build_execute_prompt(&ticket, &PromptContext::default());
        assert!(prompt.contains("Fix retry bug"));
        assert!(prompt.contains("src/http.rs"));
        assert!(prompt.contains("cargo test"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let ticket = Ticket::new(Uuid::new_v4(), "Docs fix", TicketCategory::Docs, vec![]);
        let prompt = build_execute_prompt(&ticket, &PromptContext::default());
        assert!(!prompt.contains("## Relevant learnings"));
        assert!(!prompt.contains("## Already attempted"));
    }
}
