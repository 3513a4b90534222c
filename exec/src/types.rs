use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Success,
    Failure,
    Timeout,
    Canceled,
}

/// Request to run a single command to completion (or timeout/cancel).
/// Stdin is always `Stdio::null()` — no component feeds a child process
/// interactive input.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: String,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    pub artifact_dir: PathBuf,
    pub byte_cap: usize,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            env: Vec::new(),
            timeout: Duration::from_secs(300),
            artifact_dir: PathBuf::from("."),
            byte_cap: 64 * 1024,
        }
    }
}

/// Result of one exec invocation. `stdout_path`/`stderr_path` hold the
/// full captured stream; `stdout_tail`/`stderr_tail` hold up to
/// `byte_cap` bytes from the end, for display without re-reading the file.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub status: ExecStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    pub truncated: bool,
    pub duration: Duration,
    pub error_message: Option<String>,
}

impl ExecOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == ExecStatus::Success
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to tokenize command: {0}")]
    Tokenize(String),

    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
}
