//! Verification-command execution service (§4.13 component), grounded on
//! `ratchet_exec::run`'s one-shot-process model: one `runs` row per QA
//! attempt series, one `run_steps` row per command, first failure in an
//! attempt skips the remaining commands rather than running them against
//! an already-broken tree. Persisted through [`RunRepository`]; a database
//! error never fails QA itself, only the audit trail.

use std::path::Path;
use std::time::Duration;

use ratchet_persistence::RunRepository;
use ratchet_types::{Run, RunStatus, RunStep, RunStepStatus, RunType};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QaError {
    #[error("command rejected, not on the verification allowlist: {0}")]
    NotAllowlisted(String),
    #[error("command contains a disallowed shell metacharacter: {0}")]
    ForbiddenCharacter(String),
}

/// Prefixes considered known-safe test runners. A command must start with
/// one of these (after trimming) to be eligible at all; this is a floor,
/// not a substitute for the metacharacter check below.
pub const ALLOWED_PREFIXES: &[&str] = &[
    "npm test",
    "npm run test",
    "yarn test",
    "pnpm test",
    "vitest",
    "jest",
    "pytest",
    "go test",
    "cargo test",
    "cargo nextest",
    "mvn test",
    "gradle test",
    "./gradlew test",
    "rspec",
    "mix test",
    "dotnet test",
    "phpunit",
    "swift test",
    "make test",
];

const FORBIDDEN_CHARS: &[char] = &[';', '&', '|', '`', '$', '>', '<'];

/// Reject a verification command outright rather than execute it, if it
/// contains shell metacharacters (including command substitution and
/// redirection, all of which contain one of [`FORBIDDEN_CHARS`]) or
/// newlines, or doesn't start with a known-safe test-runner prefix.
pub fn validate_command(command: &str) -> Result<(), QaError> {
    if command.contains(['\n', '\r']) || command.chars().any(|c| FORBIDDEN_CHARS.contains(&c)) {
        return Err(QaError::ForbiddenCharacter(command.to_string()));
    }
    let trimmed = command.trim();
    if !ALLOWED_PREFIXES.iter().any(|prefix| trimmed.starts_with(prefix)) {
        return Err(QaError::NotAllowlisted(command.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct QaStepResult {
    pub ordinal: u32,
    pub command: String,
    pub status: RunStepStatus,
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QaAttempt {
    pub attempt: u32,
    pub steps: Vec<QaStepResult>,
}

impl QaAttempt {
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.status == RunStepStatus::Success)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QaOutcome {
    pub attempts: Vec<QaAttempt>,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct QaConfig {
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for QaConfig {
    fn default() -> Self {
        // One pass per ticket pipeline invocation; the bigger Qa -> Execute
        // retry loop that re-drives the agent lives in the phase machine,
        // not here. `max_attempts` above 1 only covers re-running a flaky
        // suite without touching the code.
        Self { max_attempts: 1, timeout: Duration::from_secs(600) }
    }
}

/// Run every verification command once per attempt, up to `config.max_attempts`,
/// stopping at the first attempt where everything passes. An invalid
/// command fails the step without ever spawning a process — the
/// allowlist check always runs before exec.
///
/// Opens one `runs` row (type `qa`, linked to `ticket_id`) for the whole
/// attempt series and one `run_steps` row per command. Persistence
/// failures are logged and otherwise ignored: a broken database must not
/// stop QA from reporting pass/fail to the pipeline.
#[allow(clippy::too_many_arguments)]
pub async fn run_verification(
    commands: &[String],
    cwd: &Path,
    config: &QaConfig,
    cancel: CancellationToken,
    run_repo: &RunRepository<'_>,
    project_id: Uuid,
    ticket_id: Uuid,
) -> QaOutcome {
    let run = Run::new(RunType::Qa, project_id, Some(ticket_id));
    if let Err(err) = run_repo.insert(&run) {
        tracing::warn!(run_id = %run.id, error = %err, "failed to record qa run");
    }

    let mut attempts = Vec::new();

    for attempt_no in 1..=config.max_attempts {
        let mut steps = Vec::new();
        let mut already_failed = false;

        for (ordinal, command) in commands.iter().enumerate() {
            let ordinal = ordinal as u32;
            if already_failed {
                let mut row = RunStep::new(run.id, attempt_no, ordinal, command.clone(), cwd.display().to_string(), config.timeout);
                row.status = RunStepStatus::Skipped;
                if let Err(err) = run_repo.insert_step(&row) {
                    tracing::warn!(error = %err, "failed to record skipped qa step");
                }
                steps.push(QaStepResult {
                    ordinal,
                    command: command.clone(),
                    status: RunStepStatus::Skipped,
                    exit_code: None,
                    stdout_tail: String::new(),
                    stderr_tail: String::new(),
                });
                continue;
            }

            let row = RunStep::new(run.id, attempt_no, ordinal, command.clone(), cwd.display().to_string(), config.timeout);
            if let Err(err) = run_repo.insert_step(&row) {
                tracing::warn!(error = %err, "failed to record qa step");
            }

            if let Err(err) = validate_command(command) {
                tracing::warn!(command = %command, error = %err, "qa command rejected before execution");
                if let Err(db_err) = run_repo.complete_step(row.id, RunStepStatus::Failed, None, 0, false, &err.to_string()) {
                    tracing::warn!(error = %db_err, "failed to record qa step rejection");
                }
                steps.push(QaStepResult {
                    ordinal,
                    command: command.clone(),
                    status: RunStepStatus::Failed,
                    exit_code: None,
                    stdout_tail: String::new(),
                    stderr_tail: err.to_string(),
                });
                already_failed = true;
                continue;
            }

            if let Err(err) = run_repo.mark_step_started(row.id) {
                tracing::warn!(error = %err, "failed to mark qa step started");
            }

            let request = ratchet_exec::ExecRequest {
                timeout: config.timeout,
                artifact_dir: cwd.to_path_buf(),
                ..ratchet_exec::ExecRequest::new(command.as_str(), cwd)
            };
            let outcome = ratchet_exec::run(request, cancel.clone()).await;
            let step = match outcome {
                Ok(o) if o.succeeded() => {
                    if let Err(db_err) = run_repo.complete_step(row.id, RunStepStatus::Success, o.exit_code, o.stdout_tail.len() as u64, false, &o.stdout_tail) {
                        tracing::warn!(error = %db_err, "failed to record qa step success");
                    }
                    QaStepResult {
                        ordinal,
                        command: command.clone(),
                        status: RunStepStatus::Success,
                        exit_code: o.exit_code,
                        stdout_tail: o.stdout_tail,
                        stderr_tail: o.stderr_tail,
                    }
                }
                Ok(o) => {
                    already_failed = true;
                    if let Err(db_err) = run_repo.complete_step(row.id, RunStepStatus::Failed, o.exit_code, o.stderr_tail.len() as u64, false, &o.stderr_tail) {
                        tracing::warn!(error = %db_err, "failed to record qa step failure");
                    }
                    QaStepResult {
                        ordinal,
                        command: command.clone(),
                        status: RunStepStatus::Failed,
                        exit_code: o.exit_code,
                        stdout_tail: o.stdout_tail,
                        stderr_tail: o.stderr_tail,
                    }
                }
                Err(err) => {
                    already_failed = true;
                    if let Err(db_err) = run_repo.complete_step(row.id, RunStepStatus::Failed, None, 0, false, &err.to_string()) {
                        tracing::warn!(error = %db_err, "failed to record qa step error");
                    }
                    QaStepResult {
                        ordinal,
                        command: command.clone(),
                        status: RunStepStatus::Failed,
                        exit_code: None,
                        stdout_tail: String::new(),
                        stderr_tail: err.to_string(),
                    }
                }
            };
            steps.push(step);
        }

        let succeeded = steps.iter().all(|s| s.status == RunStepStatus::Success);
        attempts.push(QaAttempt { attempt: attempt_no, steps });
        if succeeded {
            if let Err(err) = run_repo.set_status(run.id, RunStatus::Success) {
                tracing::warn!(run_id = %run.id, error = %err, "failed to close out successful qa run");
            }
            return QaOutcome { attempts, success: true };
        }
    }

    if let Err(err) = run_repo.set_status(run.id, RunStatus::Failure) {
        tracing::warn!(run_id = %run.id, error = %err, "failed to close out failed qa run");
    }
    QaOutcome { attempts, success: false }
}
