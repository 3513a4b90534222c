//! Request/outcome shapes shared by every `AgentBackend` implementation,
//! grounded on `codex-core::cli_executor::types` (`Conversation`,
//! `StreamEvent`, `CliError`) but narrowed to the single `run` contract
//! the phase machine and ticket pipeline actually consume.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Which role a backend is invoked for. Scout and execute prompts differ
/// in structure and in what the model is allowed to do, so a backend
/// built for one role is never substituted for the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Scout,
    Execute,
}

/// A single invocation of an agent backend.
#[derive(Clone)]
pub struct AgentRequest {
    pub worktree_path: PathBuf,
    pub prompt: String,
    pub timeout: Duration,
    pub verbose: bool,
    pub max_iterations: u32,
    pub on_progress: Option<Arc<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl AgentRequest {
    pub fn new(worktree_path: impl Into<PathBuf>, prompt: impl Into<String>) -> Self {
        Self {
            worktree_path: worktree_path.into(),
            prompt: prompt.into(),
            timeout: Duration::from_secs(600),
            verbose: false,
            max_iterations: 25,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, cb: Arc<dyn Fn(ProgressEvent) + Send + Sync>) -> Self {
        self.on_progress = Some(cb);
        self
    }

    fn notify(&self, event: ProgressEvent) {
        if let Some(cb) = &self.on_progress {
            cb(event);
        }
    }

    pub(crate) fn notify_delta(&self, text: &str) {
        self.notify(ProgressEvent::Delta(text.to_string()));
    }

    pub(crate) fn notify_tool_call(&self, name: &str, args: &str) {
        self.notify(ProgressEvent::ToolCall {
            name: name.to_string(),
            args: args.to_string(),
        });
    }

    pub(crate) fn notify_tool_result(&self, name: &str, ok: bool) {
        self.notify(ProgressEvent::ToolResult {
            name: name.to_string(),
            ok,
        });
    }

    pub(crate) fn notify_iteration(&self, n: u32) {
        self.notify(ProgressEvent::Iteration(n));
    }
}

/// Incremental signal surfaced to a caller-supplied progress callback
/// while an execute-role backend's tool loop runs. Purely observational —
/// the spindle detector consumes the final `AgentOutcome`, not this
/// stream, so a dropped callback never changes engine behavior.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Delta(String),
    ToolCall { name: String, args: String },
    ToolResult { name: String, ok: bool },
    Iteration(u32),
}

/// Result of one agent backend invocation.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
    pub error: Option<String>,
    /// Number of tool-use iterations the execute loop ran; always 0 for a
    /// scout-role backend, which makes a single call.
    pub iterations: u32,
}

impl AgentOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            timed_out: false,
            duration: Duration::default(),
            error: Some(error.into()),
            iterations: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent binary not found: {0}")]
    BinaryNotFound(String),

    #[error("agent process failed: {0}")]
    ProcessFailed(String),

    #[error("agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to parse agent output: {0}")]
    ParseError(String),

    #[error("max iterations ({0}) exceeded without a terminal response")]
    MaxIterationsExceeded(u32),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
