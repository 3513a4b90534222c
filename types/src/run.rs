use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    Scout,
    Worker,
    Qa,
    Ci,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failure,
    Canceled,
}

/// One execution of the engine, or one execution of a single ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub id: Uuid,
    pub run_type: RunType,
    pub project_id: Uuid,
    pub ticket_id: Option<Uuid>,
    pub status: RunStatus,
    pub iteration: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub terminal_error: Option<String>,
    pub metadata: serde_json::Value,
    pub pr_url: Option<String>,
}

impl Run {
    pub fn new(run_type: RunType, project_id: Uuid, ticket_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_type,
            project_id,
            ticket_id,
            status: RunStatus::Running,
            iteration: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            terminal_error: None,
            metadata: serde_json::Value::Null,
            pr_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStepStatus {
    Queued,
    Running,
    Success,
    Failed,
    Skipped,
    Canceled,
}

/// A row per `(run, attempt, ordinal)` in retriable multi-step runs (QA).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStep {
    pub id: Uuid,
    pub run_id: Uuid,
    pub attempt: u32,
    pub ordinal: u32,
    pub status: RunStepStatus,
    pub command: String,
    pub cwd: String,
    pub timeout_ms: u64,
    pub exit_code: Option<i32>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub output_bytes: u64,
    pub truncated: bool,
    pub tail: String,
}

impl RunStep {
    /// A freshly queued step, not yet started or completed.
    pub fn new(
        run_id: Uuid,
        attempt: u32,
        ordinal: u32,
        command: impl Into<String>,
        cwd: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            attempt,
            ordinal,
            status: RunStepStatus::Queued,
            command: command.into(),
            cwd: cwd.into(),
            timeout_ms: timeout.as_millis() as u64,
            exit_code: None,
            stdout_path: None,
            stderr_path: None,
            output_bytes: 0,
            truncated: false,
            tail: String::new(),
        }
    }
}
