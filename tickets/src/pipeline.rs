//! The nine-step ticket execution pipeline (§4.10): worktree, agent,
//! spindle check, scope check, commit, push, QA, PR, cleanup. Grounded on
//! the teacher's step-oriented session driver, generalized from a fixed
//! CLI-turn loop into this engine's ticket lifecycle — each step returns
//! whether the pipeline continues and, on a terminal step, why it stopped.

use std::time::Duration;

use ratchet_agent::{AgentBackend, AgentRequest};
use ratchet_exec::ExecRequest;
use ratchet_persistence::RunRepository;
use ratchet_spindle::SpindleConfig;
use ratchet_types::{Learning, LearningCategory, SourceTag, Ticket, TicketCategory};
use ratchet_worktree::WorktreeManager;
use tokio_util::sync::CancellationToken;

use crate::gitdiff::{changed_files, changed_line_count, workdir_diff_text};
use crate::prompt::{build_execute_prompt, PromptContext};
use crate::qa::{run_verification, QaConfig, QaOutcome};
use crate::scope::check_scope;

fn category_name(category: TicketCategory) -> &'static str {
    match category {
        TicketCategory::Refactor => "refactor",
        TicketCategory::Docs => "docs",
        TicketCategory::Test => "test",
        TicketCategory::Perf => "perf",
        TicketCategory::Security => "security",
        TicketCategory::Fix => "fix",
        TicketCategory::Cleanup => "cleanup",
        TicketCategory::Types => "types",
    }
}

#[derive(Debug, Clone)]
pub struct TicketRunConfig {
    pub agent_timeout: Duration,
    pub max_iterations: u32,
    pub qa: QaConfig,
    pub spindle: SpindleConfig,
    pub draft_prs: bool,
    pub gh_binary: String,
}

impl Default for TicketRunConfig {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(600),
            max_iterations: 25,
            qa: QaConfig::default(),
            spindle: SpindleConfig::default(),
            draft_prs: false,
            gh_binary: "gh".to_string(),
        }
    }
}

/// How a ticket's run ended. The phase machine maps each variant onto its
/// own transition (`NextTicket`, `Blocked`, spindle-adjacent terminals).
///
/// `QaFailed` is deliberately not named `Blocked`: whether a failed QA pass
/// actually blocks the ticket depends on the session's retry budget, which
/// this pipeline doesn't know about. The driver routes it through the `Qa`
/// phase (`PhaseMachine::on_qa_result`) instead of treating it as final.
#[derive(Debug, Clone, PartialEq)]
pub enum TicketTerminal {
    Done { pr_url: Option<String> },
    Blocked { reason: String },
    SpindleAborted { reason: String },
    NoChanges,
    QaFailed { qa: QaOutcome },
}

#[derive(Debug, Clone, Default)]
pub struct TicketRunResult {
    pub terminal: Option<TicketTerminal>,
    pub changed_files: Vec<String>,
    pub lines_changed: u32,
    pub learnings: Vec<Learning>,
    /// `Some(true)` once a ticket completes successfully (for the dedup
    /// store's `completed` flag); `Some(false)` on a recorded failure;
    /// `None` if the run never reached a dedup-worthy outcome (e.g. the
    /// worktree itself failed to create).
    pub dedup_outcome: Option<bool>,
    pub failure_reason: Option<String>,
    pub qa: Option<QaOutcome>,
}

impl TicketRunResult {
    fn terminal(terminal: TicketTerminal) -> Self {
        Self { terminal: Some(terminal), ..Default::default() }
    }
}

fn commit_message(ticket: &Ticket) -> String {
    format!("{}: {}", category_name(ticket.category), ticket.title)
}

fn branch_name(ticket: &Ticket) -> String {
    format!("ratchet/{}-{}", category_name(ticket.category), ticket.id)
}

/// Run one ticket end-to-end against a freshly created worktree checked
/// out at `base_rev`. The worktree is always cleaned up on return — its
/// handle lives entirely inside this function and is dropped at the end,
/// satisfying the single-cleanup-call-per-ticket invariant.
#[allow(clippy::too_many_arguments)]
pub async fn run_ticket(
    ticket: &Ticket,
    base_rev: &str,
    worktrees: &WorktreeManager,
    agent: &dyn AgentBackend,
    prompt_ctx: &PromptContext,
    config: &TicketRunConfig,
    cancel: &CancellationToken,
    run_repo: &RunRepository<'_>,
) -> TicketRunResult {
    // Step 1: worktree. Fatal on failure — nothing was created, so there's
    // no cleanup to do.
    let handle = match worktrees.create(base_rev) {
        Ok(h) => h,
        Err(err) => {
            return TicketRunResult::terminal(TicketTerminal::Blocked {
                reason: format!("failed to create worktree: {err}"),
            });
        }
    };

    // Step 2: agent.
    let prompt = build_execute_prompt(ticket, prompt_ctx);
    let request = AgentRequest {
        timeout: config.agent_timeout,
        max_iterations: config.max_iterations,
        ..AgentRequest::new(handle.path(), prompt)
    };
    let outcome = match agent.run(&request, cancel).await {
        Ok(o) => o,
        Err(err) => {
            return TicketRunResult {
                learnings: vec![Learning::new(
                    format!("agent invocation failed for '{}': {err}", ticket.title),
                    LearningCategory::Warning,
                    SourceTag::TicketFailure,
                )],
                dedup_outcome: Some(false),
                failure_reason: Some("agent_error".to_string()),
                ..TicketRunResult::terminal(TicketTerminal::Blocked { reason: err.to_string() })
            };
        }
    };

    // Step 3: spindle check.
    let diff_text = workdir_diff_text(handle.path()).unwrap_or_default();
    let mut spindle_state = ratchet_types::SpindleState::new(5);
    let verdict = ratchet_spindle::check(&mut spindle_state, &outcome.stdout, &diff_text, None, &config.spindle);
    if verdict.should_abort {
        return TicketRunResult {
            dedup_outcome: Some(false),
            failure_reason: Some("spindle_abort".to_string()),
            ..TicketRunResult::terminal(TicketTerminal::SpindleAborted {
                reason: format!("{:?}", verdict.reason),
            })
        };
    }
    if verdict.should_block {
        // Decided design point: a should_block verdict never counts
        // against the session's spindle recovery budget — it indicates a
        // class of failure no amount of retries fixes.
        return TicketRunResult {
            dedup_outcome: Some(false),
            failure_reason: Some("spindle_blocked".to_string()),
            ..TicketRunResult::terminal(TicketTerminal::Blocked {
                reason: format!("spindle blocked: {:?}", verdict.reason),
            })
        };
    }

    // Step 4: scope check.
    let changed = changed_files(handle.path()).unwrap_or_default();
    if changed.is_empty() {
        return TicketRunResult {
            changed_files: changed,
            ..TicketRunResult::terminal(TicketTerminal::NoChanges)
        };
    }
    let lines_changed = changed_line_count(handle.path()).unwrap_or(0);
    let violations = check_scope(&changed, &ticket.allowed_paths, &ticket.forbidden_paths);
    if !violations.is_empty() {
        return TicketRunResult {
            changed_files: changed,
            lines_changed,
            dedup_outcome: Some(false),
            failure_reason: Some("scope_violation".to_string()),
            learnings: vec![Learning::new(
                format!("'{}' touched files outside its allowed scope", ticket.title),
                LearningCategory::Warning,
                SourceTag::ScopeViolation,
            )],
            ..TicketRunResult::terminal(TicketTerminal::Blocked {
                reason: format!("scope violation: {violations:?}"),
            })
        };
    }

    // Step 5: commit.
    if let Err(err) = handle.commit(&commit_message(ticket)) {
        return TicketRunResult {
            changed_files: changed,
            lines_changed,
            dedup_outcome: Some(false),
            failure_reason: Some("commit_failed".to_string()),
            ..TicketRunResult::terminal(TicketTerminal::Blocked { reason: format!("commit failed: {err}") })
        };
    }

    // Step 6: push. A network failure here is non-fatal: the ticket still
    // ends `Done` with no PR URL, and QA/PR are skipped since there's
    // nothing upstream to open a PR against.
    let branch = branch_name(ticket);
    if let Err(err) = handle.push(&branch) {
        return TicketRunResult {
            changed_files: changed,
            lines_changed,
            dedup_outcome: Some(true),
            learnings: vec![Learning::new(
                format!("push failed for '{}': {err}", ticket.title),
                LearningCategory::Context,
                SourceTag::TicketFailure,
            )],
            ..TicketRunResult::terminal(TicketTerminal::Done { pr_url: None })
        };
    }

    // Step 7: QA.
    let qa_outcome = run_verification(
        &ticket.verification_commands,
        handle.path(),
        &config.qa,
        cancel.clone(),
        run_repo,
        ticket.project_id,
        ticket.id,
    )
    .await;
    if !qa_outcome.success {
        return TicketRunResult {
            changed_files: changed,
            lines_changed,
            dedup_outcome: Some(false),
            failure_reason: Some("qa_failed".to_string()),
            learnings: vec![Learning::new(
                format!("failureType:qa_failed — '{}' failed verification", ticket.title),
                LearningCategory::Gotcha,
                SourceTag::QaFailure,
            )],
            qa: Some(qa_outcome.clone()),
            ..TicketRunResult::terminal(TicketTerminal::QaFailed { qa: qa_outcome })
        };
    }

    // Step 8: PR.
    let pr_url = create_pull_request(ticket, &branch, config, cancel).await;
    let learnings = if pr_url.is_none() {
        vec![Learning::new(
            format!("PR creation failed for '{}'", ticket.title),
            LearningCategory::Context,
            SourceTag::TicketFailure,
        )]
    } else {
        Vec::new()
    };

    // Step 9: cleanup happens implicitly when `handle` drops at the end of
    // this function.
    TicketRunResult {
        changed_files: changed,
        lines_changed,
        dedup_outcome: Some(true),
        learnings,
        qa: Some(qa_outcome),
        ..TicketRunResult::terminal(TicketTerminal::Done { pr_url })
    }
}

async fn create_pull_request(ticket: &Ticket, branch: &str, config: &TicketRunConfig, cancel: &CancellationToken) -> Option<String> {
    let mut command = format!("{} pr create --title {:?} --body {:?} --head {:?}", config.gh_binary, ticket.title, ticket.description, branch);
    if config.draft_prs {
        command.push_str(" --draft");
    }
    let request = ExecRequest::new(command, std::env::current_dir().unwrap_or_default());
    match ratchet_exec::run(request, cancel.clone()).await {
        Ok(outcome) if outcome.succeeded() => {
            let url = outcome.stdout_tail.lines().last().unwrap_or("").trim();
            if url.starts_with("http") {
                Some(url.to_string())
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use git2::Repository;
    use ratchet_agent::{AgentError, AgentOutcome, AgentRole};
    use ratchet_persistence::adapter::SqliteAdapter;
    use ratchet_persistence::project_repo::ProjectRepository;
    use ratchet_types::{Project, TicketCategory};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// A fresh, empty run-repository backing store for tests that don't
    /// exercise QA persistence directly (none of these reach step 7).
    fn test_run_repo(dir: &Path) -> SqliteAdapter {
        let adapter = SqliteAdapter::open(&dir.join("ratchet.db"), 2).unwrap();
        let project = Project::new("demo", dir.display().to_string());
        ProjectRepository::new(&adapter).insert(&project).unwrap();
        adapter
    }

    fn init_repo(dir: &Path) {
        let repo = Repository::init(dir).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
    }

    struct NoopAgent {
        writes_file: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AgentBackend for NoopAgent {
        fn role(&self) -> AgentRole {
            AgentRole::Execute
        }

        async fn run(&self, request: &AgentRequest, _cancel: &CancellationToken) -> Result<AgentOutcome, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.writes_file {
                std::fs::write(request.worktree_path.join("CHANGED.txt"), "agent wrote this\n").unwrap();
            }
            Ok(AgentOutcome {
                success: true,
                stdout: "did the work".to_string(),
                stderr: String::new(),
                exit_code: Some(0),
                timed_out: false,
                duration: Duration::from_secs(1),
                error: None,
                iterations: 1,
            })
        }
    }

    #[tokio::test]
    async fn no_changes_aborts_without_touching_qa() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let manager = WorktreeManager::new(dir.path());
        let agent = NoopAgent { writes_file: false, calls: AtomicUsize::new(0) };
        let ticket = Ticket::new(Uuid::new_v4(), "No-op ticket", TicketCategory::Cleanup, vec![]);
        let adapter = test_run_repo(dir.path());
        let run_repo = RunRepository::new(&adapter);

        let result = run_ticket(&ticket, "HEAD", &manager, &agent, &PromptContext::default(), &TicketRunConfig::default(), &CancellationToken::new(), &run_repo).await;
        assert_eq!(result.terminal, Some(TicketTerminal::NoChanges));
    }

    #[tokio::test]
    async fn scope_violation_blocks_ticket() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let manager = WorktreeManager::new(dir.path());
        let agent = NoopAgent { writes_file: true, calls: AtomicUsize::new(0) };
        let ticket = Ticket::new(Uuid::new_v4(), "Touches wrong file", TicketCategory::Fix, vec!["src/only_this.rs".to_string()]);
        let adapter = test_run_repo(dir.path());
        let run_repo = RunRepository::new(&adapter);

        let result = run_ticket(&ticket, "HEAD", &manager, &agent, &PromptContext::default(), &TicketRunConfig::default(), &CancellationToken::new(), &run_repo).await;
        assert!(matches!(result.terminal, Some(TicketTerminal::Blocked { .. })));
        assert_eq!(result.failure_reason.as_deref(), Some("scope_violation"));
    }

    #[tokio::test]
    async fn agent_error_is_blocked_with_a_learning() {
        struct FailingAgent;
        #[async_trait]
        impl AgentBackend for FailingAgent {
            fn role(&self) -> AgentRole {
                AgentRole::Execute
            }
            async fn run(&self, _request: &AgentRequest, _cancel: &CancellationToken) -> Result<AgentOutcome, AgentError> {
                Err(AgentError::ProcessFailed("boom".to_string()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let manager = WorktreeManager::new(dir.path());
        let ticket = Ticket::new(Uuid::new_v4(), "Will fail", TicketCategory::Fix, vec![]);
        let adapter = test_run_repo(dir.path());
        let run_repo = RunRepository::new(&adapter);

        let result = run_ticket(&ticket, "HEAD", &manager, &FailingAgent, &PromptContext::default(), &TicketRunConfig::default(), &CancellationToken::new(), &run_repo).await;
        assert!(matches!(result.terminal, Some(TicketTerminal::Blocked { .. })));
        assert_eq!(result.learnings.len(), 1);
    }
}
