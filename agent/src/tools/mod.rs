//! Tool dispatcher for the execute-role agentic loop: `read_file`,
//! `write_file`, and `run_command`, each confined to the worktree by
//! [`path_guard::resolve_path`] before touching disk or spawning a
//! process.

pub mod path_guard;

use std::path::PathBuf;
use std::time::Duration;

use ratchet_exec::{ExecRequest, ExecStatus};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use path_guard::PathGuardError;

/// One tool invocation requested by the model, as decoded from the
/// backend's tool-use protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    RunCommand { command: String },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::ReadFile { .. } => "read_file",
            ToolCall::WriteFile { .. } => "write_file",
            ToolCall::RunCommand { .. } => "run_command",
        }
    }
}

/// Outcome of dispatching a [`ToolCall`], fed back to the model as the
/// next turn's tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    fn err(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
        }
    }
}

/// Confines every tool call to one worktree root and caps `run_command`'s
/// output and wall time the same way the QA service caps verification
/// commands.
pub struct ToolDispatcher {
    worktree_root: PathBuf,
    artifact_dir: PathBuf,
    command_timeout: Duration,
    output_byte_cap: usize,
}

impl ToolDispatcher {
    pub fn new(worktree_root: impl Into<PathBuf>, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            worktree_root: worktree_root.into(),
            artifact_dir: artifact_dir.into(),
            command_timeout: Duration::from_secs(120),
            output_byte_cap: 64 * 1024,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub async fn dispatch(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        match call {
            ToolCall::ReadFile { path } => self.read_file(path).await,
            ToolCall::WriteFile { path, content } => self.write_file(path, content).await,
            ToolCall::RunCommand { command } => self.run_command(command, cancel).await,
        }
    }

    async fn read_file(&self, logical_path: &str) -> ToolResult {
        let resolved = match path_guard::resolve_path(&self.worktree_root, logical_path) {
            Ok(p) => p,
            Err(e) => return Self::guard_error(e),
        };
        match tokio::fs::read_to_string(&resolved).await {
            Ok(contents) => ToolResult::ok(contents),
            Err(e) => ToolResult::err(format!("failed to read {logical_path}: {e}")),
        }
    }

    async fn write_file(&self, logical_path: &str, content: &str) -> ToolResult {
        let resolved = match path_guard::resolve_path(&self.worktree_root, logical_path) {
            Ok(p) => p,
            Err(e) => return Self::guard_error(e),
        };
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::err(format!("failed to create parent dirs: {e}"));
            }
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => ToolResult::ok(format!("wrote {} bytes to {logical_path}", content.len())),
            Err(e) => ToolResult::err(format!("failed to write {logical_path}: {e}")),
        }
    }

    async fn run_command(&self, command: &str, cancel: &CancellationToken) -> ToolResult {
        let request = ExecRequest {
            command: command.to_string(),
            cwd: self.worktree_root.clone(),
            env: Vec::new(),
            timeout: self.command_timeout,
            artifact_dir: self.artifact_dir.clone(),
            byte_cap: self.output_byte_cap,
        };
        match ratchet_exec::run(request, cancel.clone()).await {
            Ok(outcome) => {
                let mut output = outcome.stdout_tail.clone();
                if !outcome.stderr_tail.is_empty() {
                    output.push_str("\n--- stderr ---\n");
                    output.push_str(&outcome.stderr_tail);
                }
                ToolResult {
                    output,
                    is_error: outcome.status != ExecStatus::Success,
                }
            }
            Err(e) => ToolResult::err(format!("failed to run command: {e}")),
        }
    }

    fn guard_error(err: PathGuardError) -> ToolResult {
        ToolResult::err(format!("path rejected: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(dir: &std::path::Path) -> ToolDispatcher {
        ToolDispatcher::new(dir, dir.join("artifacts"))
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let cancel = CancellationToken::new();

        let write = d
            .dispatch(
                &ToolCall::WriteFile {
                    path: "nested/file.txt".into(),
                    content: "hello".into(),
                },
                &cancel,
            )
            .await;
        assert!(!write.is_error);

        let read = d
            .dispatch(
                &ToolCall::ReadFile {
                    path: "nested/file.txt".into(),
                },
                &cancel,
            )
            .await;
        assert!(!read.is_error);
        assert_eq!(read.output, "hello");
    }

    #[tokio::test]
    async fn read_rejects_traversal_outside_worktree() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let cancel = CancellationToken::new();

        let result = d
            .dispatch(
                &ToolCall::ReadFile {
                    path: "../../etc/passwd".into(),
                },
                &cancel,
            )
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("path rejected"));
    }

    #[tokio::test]
    async fn run_command_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let cancel = CancellationToken::new();

        let result = d
            .dispatch(
                &ToolCall::RunCommand {
                    command: "echo hi".into(),
                },
                &cancel,
            )
            .await;
        assert!(!result.is_error);
        assert!(result.output.contains("hi"));
    }

    #[tokio::test]
    async fn run_command_marks_nonzero_exit_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let cancel = CancellationToken::new();

        let result = d
            .dispatch(
                &ToolCall::RunCommand {
                    command: "false".into(),
                },
                &cancel,
            )
            .await;
        assert!(result.is_error);
    }
}
