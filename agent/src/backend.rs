//! `AgentBackend`: the uniform interface in front of one or more
//! subprocess-driven LLM clients, grounded on `codex-core::cli_executor`'s
//! `claude`/`gemini` driver split and `claude_pipes`'s one-shot-process-
//! per-turn session model (a fresh process per turn, resumed via the
//! backend's own session mechanism, rather than one long-lived pipe).

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ratchet_exec::{ExecRequest, ExecStatus};

use crate::tools::{ToolCall, ToolDispatcher};
use crate::trace::TraceSink;
use crate::types::{AgentError, AgentOutcome, AgentRequest, AgentRole};

/// A command to spawn, with `{prompt_file}` replaced by the absolute path
/// of a file holding that turn's prompt text before tokenization. Stdin
/// is never attached (per the exec runner's contract), so every backend
/// that needs to hand the model a prompt does it through a file the
/// child process reads itself.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub binary: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(binary: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
        }
    }

    fn render(&self, prompt_file: &std::path::Path) -> String {
        let placeholder = prompt_file.display().to_string();
        let rendered_args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{prompt_file}", &placeholder))
            .collect();
        let mut parts = vec![shell_quote(&self.binary)];
        parts.extend(rendered_args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }
}

fn shell_quote(s: &str) -> String {
    if s.chars().all(|c| c.is_alphanumeric() || "-_./:{}".contains(c)) {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// Common interface every agent backend implements, selected per-role
/// (scout vs execute) and injected into the phase machine as
/// `Arc<dyn AgentBackend>`.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    fn role(&self) -> AgentRole;

    async fn run(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome, AgentError>;

    /// Feature-tested once per session for backends (typically MCP-server
    /// ones) that can fan a scout batch out internally instead of the
    /// caller driving a semaphore-bounded loop itself.
    fn as_run_all(&self) -> Option<&dyn RunAllCapable> {
        None
    }
}

/// Optional capability: a backend that can fan out a batch of requests
/// internally, more efficiently than the caller issuing them one at a
/// time behind a semaphore.
#[async_trait]
pub trait RunAllCapable: Send + Sync {
    async fn run_all(
        &self,
        requests: Vec<AgentRequest>,
        cancel: &CancellationToken,
    ) -> Result<Vec<AgentOutcome>, AgentError>;
}

async fn write_prompt_file(artifact_dir: &std::path::Path, name: &str, prompt: &str) -> Result<PathBuf, AgentError> {
    tokio::fs::create_dir_all(artifact_dir).await?;
    let path = artifact_dir.join(name);
    tokio::fs::write(&path, prompt).await?;
    Ok(path)
}

/// A single-call backend that returns the child process's raw stdout
/// (expected to be JSON per the scout proposal schema) without any
/// tool-use loop.
pub struct ScoutBackend {
    command: CommandTemplate,
    artifact_root: PathBuf,
}

impl ScoutBackend {
    pub fn new(command: CommandTemplate, artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            command,
            artifact_root: artifact_root.into(),
        }
    }
}

#[async_trait]
impl AgentBackend for ScoutBackend {
    fn role(&self) -> AgentRole {
        AgentRole::Scout
    }

    async fn run(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome, AgentError> {
        let prompt_file = write_prompt_file(&self.artifact_root, "scout_prompt.txt", &request.prompt).await?;
        let rendered = self.command.render(&prompt_file);

        let exec_request = ExecRequest {
            command: rendered,
            cwd: request.worktree_path.clone(),
            env: Vec::new(),
            timeout: request.timeout,
            artifact_dir: self.artifact_root.clone(),
            byte_cap: 4 * 1024 * 1024,
        };

        let started = Instant::now();
        let outcome = ratchet_exec::run(exec_request, cancel.clone())
            .await
            .map_err(|e| AgentError::ProcessFailed(e.to_string()))?;

        request.notify_delta(&outcome.stdout_tail);

        Ok(AgentOutcome {
            success: outcome.status == ExecStatus::Success,
            stdout: outcome.stdout_tail,
            stderr: outcome.stderr_tail,
            exit_code: outcome.exit_code,
            timed_out: outcome.status == ExecStatus::Timeout,
            duration: started.elapsed(),
            error: outcome.error_message,
            iterations: 0,
        })
    }
}

/// The model's response to one turn of the execute loop: either a tool
/// invocation or a terminal answer. A response that doesn't parse as
/// either is treated as `Final` with the raw text, so a backend that
/// never emits the tool-use protocol still completes in one turn instead
/// of erroring.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TurnResponse {
    ToolUse(ToolCall),
    Final { text: String },
}

/// An agentic tool-use loop: spawns the configured command once per
/// turn (the backend's own session-resumption mechanism is opaque to
/// us — only the prompt file changes between turns), dispatches any
/// `tool_use` response through a [`ToolDispatcher`] scoped to the
/// request's worktree, and feeds the result back as the next turn's
/// prompt until a `Final` response or `max_iterations` is reached.
///
/// The dispatcher is built fresh from `request.worktree_path` on each
/// `run()` call rather than fixed at construction time, since one backend
/// instance is reused across tickets that each get their own freshly
/// created worktree.
pub struct ExecuteBackend {
    command: CommandTemplate,
    artifact_root: PathBuf,
    trace: Option<TraceSink>,
}

impl ExecuteBackend {
    pub fn new(command: CommandTemplate, artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            command,
            artifact_root: artifact_root.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, sink: TraceSink) -> Self {
        self.trace = Some(sink);
        self
    }

    fn trace(&self, kind: &str, detail: serde_json::Value) {
        if let Some(sink) = &self.trace {
            let _ = sink.record(kind, detail);
        }
    }
}

#[async_trait]
impl AgentBackend for ExecuteBackend {
    fn role(&self) -> AgentRole {
        AgentRole::Execute
    }

    async fn run(
        &self,
        request: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentOutcome, AgentError> {
        let started = Instant::now();
        let mut turn_prompt = request.prompt.clone();
        let mut last_stdout = String::new();
        let mut last_stderr = String::new();
        let tools = ToolDispatcher::new(request.worktree_path.clone(), self.artifact_root.clone());

        for iteration in 0..request.max_iterations {
            request.notify_iteration(iteration);
            self.trace("prompt", serde_json::json!({"iteration": iteration, "len": turn_prompt.len()}));

            let prompt_file = write_prompt_file(
                &self.artifact_root,
                &format!("turn_{iteration}.txt"),
                &turn_prompt,
            )
            .await?;
            let rendered = self.command.render(&prompt_file);

            let remaining = request
                .timeout
                .checked_sub(started.elapsed())
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                return Err(AgentError::Timeout(request.timeout));
            }

            let exec_request = ExecRequest {
                command: rendered,
                cwd: request.worktree_path.clone(),
                env: Vec::new(),
                timeout: remaining,
                artifact_dir: self.artifact_root.clone(),
                byte_cap: 1024 * 1024,
            };

            let outcome = ratchet_exec::run(exec_request, cancel.clone())
                .await
                .map_err(|e| AgentError::ProcessFailed(e.to_string()))?;

            last_stdout = outcome.stdout_tail.clone();
            last_stderr = outcome.stderr_tail.clone();

            if outcome.status == ExecStatus::Timeout {
                return Err(AgentError::Timeout(request.timeout));
            }
            if outcome.status == ExecStatus::Canceled {
                return Ok(AgentOutcome {
                    success: false,
                    stdout: last_stdout,
                    stderr: last_stderr,
                    exit_code: outcome.exit_code,
                    timed_out: false,
                    duration: started.elapsed(),
                    error: Some("canceled".to_string()),
                    iterations: iteration + 1,
                });
            }

            request.notify_delta(&outcome.stdout_tail);

            match serde_json::from_str::<TurnResponse>(outcome.stdout_tail.trim()) {
                Ok(TurnResponse::Final { text }) => {
                    self.trace("final", serde_json::json!({"iteration": iteration}));
                    return Ok(AgentOutcome {
                        success: outcome.status == ExecStatus::Success,
                        stdout: text,
                        stderr: last_stderr,
                        exit_code: outcome.exit_code,
                        timed_out: false,
                        duration: started.elapsed(),
                        error: None,
                        iterations: iteration + 1,
                    });
                }
                Ok(TurnResponse::ToolUse(call)) => {
                    request.notify_tool_call(call.name(), &serde_json::to_string(&call).unwrap_or_default());
                    self.trace(
                        "tool_call",
                        serde_json::json!({"iteration": iteration, "tool": call.name()}),
                    );

                    let result = tools.dispatch(&call, cancel).await;
                    request.notify_tool_result(call.name(), !result.is_error);
                    self.trace(
                        "tool_result",
                        serde_json::json!({"iteration": iteration, "is_error": result.is_error}),
                    );

                    turn_prompt = serde_json::to_string(&serde_json::json!({
                        "tool_result": result.output,
                        "is_error": result.is_error,
                    }))
                    .unwrap_or_default();
                }
                Err(_) => {
                    // Not a recognized tool-use/final envelope: treat the
                    // raw output as the final answer rather than failing
                    // a backend that doesn't speak the protocol.
                    return Ok(AgentOutcome {
                        success: outcome.status == ExecStatus::Success,
                        stdout: last_stdout,
                        stderr: last_stderr,
                        exit_code: outcome.exit_code,
                        timed_out: false,
                        duration: started.elapsed(),
                        error: None,
                        iterations: iteration + 1,
                    });
                }
            }
        }

        Err(AgentError::MaxIterationsExceeded(request.max_iterations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scout_backend_returns_raw_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScoutBackend::new(
            CommandTemplate::new("sh", vec!["-c".into(), "cat {prompt_file}".into()]),
            dir.path().join("artifacts"),
        );

        let request = AgentRequest::new(dir.path(), "find dead code");
        let outcome = backend.run(&request, &CancellationToken::new()).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.stdout.trim(), "find dead code");
        assert_eq!(outcome.iterations, 0);
    }

    #[tokio::test]
    async fn execute_backend_returns_final_on_first_turn() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ExecuteBackend::new(
            CommandTemplate::new(
                "sh",
                vec!["-c".into(), r#"echo '{"type":"final","text":"done"}'"#.into()],
            ),
            dir.path().join("artifacts"),
        );

        let request = AgentRequest::new(dir.path(), "fix the bug");
        let outcome = backend.run(&request, &CancellationToken::new()).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.stdout, "done");
        assert_eq!(outcome.iterations, 1);
    }

    #[tokio::test]
    async fn execute_backend_dispatches_tool_use_then_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("calls");

        // First invocation requests a write_file tool call; second turn
        // (prompt is now the tool result) returns final.
        let script = format!(
            r#"
            if [ -f {counter} ]; then
              echo '{{"type":"final","text":"wrote it"}}'
            else
              touch {counter}
              echo '{{"type":"tool_use","tool":"write_file","path":"out.txt","content":"hi"}}'
            fi
            "#,
            counter = counter.display()
        );

        let backend = ExecuteBackend::new(
            CommandTemplate::new("sh", vec!["-c".into(), script]),
            dir.path().join("artifacts"),
        );

        let request = AgentRequest::new(dir.path(), "write a file");
        let outcome = backend.run(&request, &CancellationToken::new()).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.stdout, "wrote it");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hi");
    }

    #[tokio::test]
    async fn execute_backend_gives_up_after_max_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ExecuteBackend::new(
            CommandTemplate::new(
                "sh",
                vec![
                    "-c".into(),
                    r#"echo '{"type":"tool_use","tool":"run_command","command":"true"}'"#.into(),
                ],
            ),
            dir.path().join("artifacts"),
        );

        let mut request = AgentRequest::new(dir.path(), "loop forever");
        request.max_iterations = 2;
        let err = backend.run(&request, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, AgentError::MaxIterationsExceeded(2)));
    }
}
