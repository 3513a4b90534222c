use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use ratchet_types::{Run, RunStatus, RunStep, RunStepStatus, RunType};
use uuid::Uuid;

use crate::adapter::SqliteAdapter;
use crate::error::{PersistenceError, Result};

pub struct RunRepository<'a> {
    adapter: &'a SqliteAdapter,
}

fn run_type_str(t: RunType) -> &'static str {
    match t {
        RunType::Scout => "scout",
        RunType::Worker => "worker",
        RunType::Qa => "qa",
        RunType::Ci => "ci",
    }
}

fn run_status_str(s: RunStatus) -> &'static str {
    match s {
        RunStatus::Running => "running",
        RunStatus::Success => "success",
        RunStatus::Failure => "failure",
        RunStatus::Canceled => "canceled",
    }
}

fn parse_run_status(s: &str) -> RunStatus {
    match s {
        "success" => RunStatus::Success,
        "failure" => RunStatus::Failure,
        "canceled" => RunStatus::Canceled,
        _ => RunStatus::Running,
    }
}

fn step_status_str(s: RunStepStatus) -> &'static str {
    match s {
        RunStepStatus::Queued => "queued",
        RunStepStatus::Running => "running",
        RunStepStatus::Success => "success",
        RunStepStatus::Failed => "failed",
        RunStepStatus::Skipped => "skipped",
        RunStepStatus::Canceled => "canceled",
    }
}

fn parse_step_status(s: &str) -> RunStepStatus {
    match s {
        "running" => RunStepStatus::Running,
        "success" => RunStepStatus::Success,
        "failed" => RunStepStatus::Failed,
        "skipped" => RunStepStatus::Skipped,
        "canceled" => RunStepStatus::Canceled,
        _ => RunStepStatus::Queued,
    }
}

fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_step(row: &Row) -> rusqlite::Result<RunStep> {
    let id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let status: String = row.get(4)?;
    let timeout_ms: i64 = row.get(7)?;
    let output_bytes: i64 = row.get(11)?;
    Ok(RunStep {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        run_id: Uuid::parse_str(&run_id).unwrap_or_default(),
        attempt: row.get(2)?,
        ordinal: row.get(3)?,
        status: parse_step_status(&status),
        command: row.get(5)?,
        cwd: row.get(6)?,
        timeout_ms: timeout_ms as u64,
        exit_code: row.get(8)?,
        stdout_path: row.get(9)?,
        stderr_path: row.get(10)?,
        output_bytes: output_bytes as u64,
        truncated: row.get(12)?,
        tail: row.get(13)?,
    })
}

fn row_to_run(row: &Row) -> rusqlite::Result<Run> {
    let id: String = row.get(0)?;
    let run_type: String = row.get(1)?;
    let project_id: String = row.get(2)?;
    let ticket_id: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let started_at: Option<String> = row.get(7)?;
    let completed_at: Option<String> = row.get(8)?;
    let metadata: String = row.get(10)?;

    Ok(Run {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        run_type: match run_type.as_str() {
            "worker" => RunType::Worker,
            "qa" => RunType::Qa,
            "ci" => RunType::Ci,
            _ => RunType::Scout,
        },
        project_id: Uuid::parse_str(&project_id).unwrap_or_default(),
        ticket_id: ticket_id.and_then(|s| Uuid::parse_str(&s).ok()),
        status: parse_run_status(&status),
        iteration: row.get(5)?,
        created_at: parse_ts(&created_at),
        started_at: parse_ts_opt(started_at),
        completed_at: parse_ts_opt(completed_at),
        terminal_error: row.get(9)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        pr_url: row.get(11)?,
    })
}

impl<'a> RunRepository<'a> {
    pub fn new(adapter: &'a SqliteAdapter) -> Self {
        Self { adapter }
    }

    pub fn insert(&self, run: &Run) -> Result<()> {
        self.adapter.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO runs (id, run_type, project_id, ticket_id, status, iteration, \
                 created_at, started_at, completed_at, terminal_error, metadata, pr_url) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    run.id.to_string(),
                    run_type_str(run.run_type),
                    run.project_id.to_string(),
                    run.ticket_id.map(|id| id.to_string()),
                    run_status_str(run.status),
                    run.iteration,
                    run.created_at.to_rfc3339(),
                    run.started_at.map(|t| t.to_rfc3339()),
                    run.completed_at.map(|t| t.to_rfc3339()),
                    run.terminal_error,
                    serde_json::to_string(&run.metadata)?,
                    run.pr_url,
                ],
            )?;
            Ok(())
        })
    }

    pub fn find(&self, id: Uuid) -> Result<Run> {
        self.adapter.query(|conn| {
            conn.query_row(
                "SELECT id, run_type, project_id, ticket_id, status, iteration, created_at, \
                 started_at, completed_at, terminal_error, metadata, pr_url FROM runs \
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_run,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    PersistenceError::NotFound(format!("run {id}"))
                }
                other => PersistenceError::Sqlite(other),
            })
        })
    }

    /// All runs recorded against a ticket, most recent first. Used to
    /// surface the QA attempt history for a ticket that's been retried.
    pub fn list_by_ticket(&self, ticket_id: Uuid) -> Result<Vec<Run>> {
        self.adapter.query(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, run_type, project_id, ticket_id, status, iteration, created_at, \
                 started_at, completed_at, terminal_error, metadata, pr_url FROM runs \
                 WHERE ticket_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map(params![ticket_id.to_string()], row_to_run)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn set_status(&self, id: Uuid, status: RunStatus) -> Result<()> {
        self.adapter.with_transaction(|tx| {
            let completed_at = matches!(
                status,
                RunStatus::Success | RunStatus::Failure | RunStatus::Canceled
            )
            .then(|| Utc::now().to_rfc3339());
            tx.execute(
                "UPDATE runs SET status = ?1, completed_at = COALESCE(?2, completed_at) WHERE id = ?3",
                params![run_status_str(status), completed_at, id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn insert_step(&self, step: &RunStep) -> Result<()> {
        self.adapter.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO run_steps (id, run_id, attempt, ordinal, status, command, cwd, \
                 timeout_ms, exit_code, stdout_path, stderr_path, output_bytes, truncated, tail) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    step.id.to_string(),
                    step.run_id.to_string(),
                    step.attempt,
                    step.ordinal,
                    step_status_str(step.status),
                    step.command,
                    step.cwd,
                    step.timeout_ms as i64,
                    step.exit_code,
                    step.stdout_path,
                    step.stderr_path,
                    step.output_bytes as i64,
                    step.truncated,
                    step.tail,
                ],
            )?;
            Ok(())
        })
    }

    /// Moves a queued step to `running`, once the exec runner is about to
    /// spawn it.
    pub fn mark_step_started(&self, id: Uuid) -> Result<()> {
        self.adapter.with_transaction(|tx| {
            tx.execute(
                "UPDATE run_steps SET status = ?1 WHERE id = ?2",
                params![step_status_str(RunStepStatus::Running), id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Records a step's terminal outcome once the exec runner (or the
    /// allowlist check ahead of it) has decided it.
    pub fn complete_step(
        &self,
        id: Uuid,
        status: RunStepStatus,
        exit_code: Option<i32>,
        output_bytes: u64,
        truncated: bool,
        tail: &str,
    ) -> Result<()> {
        self.adapter.with_transaction(|tx| {
            tx.execute(
                "UPDATE run_steps SET status = ?1, exit_code = ?2, output_bytes = ?3, \
                 truncated = ?4, tail = ?5 WHERE id = ?6",
                params![
                    step_status_str(status),
                    exit_code,
                    output_bytes as i64,
                    truncated,
                    tail,
                    id.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_steps(&self, run_id: Uuid) -> Result<Vec<RunStep>> {
        self.adapter.query(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, run_id, attempt, ordinal, status, command, cwd, timeout_ms, \
                 exit_code, stdout_path, stderr_path, output_bytes, truncated, tail \
                 FROM run_steps WHERE run_id = ?1 ORDER BY attempt ASC, ordinal ASC",
            )?;
            let rows = stmt
                .query_map(params![run_id.to_string()], row_to_step)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project_repo::ProjectRepository;
    use ratchet_types::Project;

    #[test]
    fn insert_run_then_set_status_stamps_completed_at() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SqliteAdapter::open(&dir.path().join("ratchet.db"), 2).unwrap();
        let project = Project::new("demo", "/tmp/demo");
        ProjectRepository::new(&adapter).insert(&project).unwrap();

        let run = Run::new(RunType::Scout, project.id, None);
        let repo = RunRepository::new(&adapter);
        repo.insert(&run).unwrap();
        repo.set_status(run.id, RunStatus::Success).unwrap();

        let reloaded = repo.find(run.id).unwrap();
        assert_eq!(reloaded.status, RunStatus::Success);
        assert!(reloaded.completed_at.is_some());
    }

    #[test]
    fn steps_round_trip_through_queued_running_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SqliteAdapter::open(&dir.path().join("ratchet.db"), 2).unwrap();
        let project = Project::new("demo", "/tmp/demo");
        ProjectRepository::new(&adapter).insert(&project).unwrap();

        let run = Run::new(RunType::Qa, project.id, None);
        let repo = RunRepository::new(&adapter);
        repo.insert(&run).unwrap();

        let step = RunStep::new(run.id, 1, 0, "cargo test", "/tmp/demo", std::time::Duration::from_secs(60));
        repo.insert_step(&step).unwrap();
        repo.mark_step_started(step.id).unwrap();
        repo.complete_step(step.id, RunStepStatus::Success, Some(0), 42, false, "ok")
            .unwrap();

        let steps = repo.list_steps(run.id).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, RunStepStatus::Success);
        assert_eq!(steps[0].exit_code, Some(0));
        assert_eq!(steps[0].output_bytes, 42);
        assert_eq!(steps[0].tail, "ok");
    }
}
