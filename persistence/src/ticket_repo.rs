use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use ratchet_types::{Ticket, TicketCategory, TicketStatus};
use uuid::Uuid;

use crate::adapter::SqliteAdapter;
use crate::error::{PersistenceError, Result};

pub struct TicketRepository<'a> {
    adapter: &'a SqliteAdapter,
}

fn status_str(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Backlog => "backlog",
        TicketStatus::Ready => "ready",
        TicketStatus::Leased => "leased",
        TicketStatus::InProgress => "in_progress",
        TicketStatus::InReview => "in_review",
        TicketStatus::Done => "done",
        TicketStatus::Blocked => "blocked",
        TicketStatus::Aborted => "aborted",
    }
}

fn parse_status(s: &str) -> Result<TicketStatus> {
    Ok(match s {
        "backlog" => TicketStatus::Backlog,
        "ready" => TicketStatus::Ready,
        "leased" => TicketStatus::Leased,
        "in_progress" => TicketStatus::InProgress,
        "in_review" => TicketStatus::InReview,
        "done" => TicketStatus::Done,
        "blocked" => TicketStatus::Blocked,
        "aborted" => TicketStatus::Aborted,
        other => {
            return Err(PersistenceError::Migration(format!(
                "unknown ticket status in storage: {other}"
            )));
        }
    })
}

fn category_str(category: TicketCategory) -> &'static str {
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

fn parse_category(s: &str) -> Result<TicketCategory> {
    Ok(match s {
        "refactor" => TicketCategory::Refactor,
        "docs" => TicketCategory::Docs,
        "test" => TicketCategory::Test,
        "perf" => TicketCategory::Perf,
        "security" => TicketCategory::Security,
        "fix" => TicketCategory::Fix,
        "cleanup" => TicketCategory::Cleanup,
        "types" => TicketCategory::Types,
        other => {
            return Err(PersistenceError::Migration(format!(
                "unknown ticket category in storage: {other}"
            )));
        }
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_ticket(row: &Row) -> rusqlite::Result<Ticket> {
    let id: String = row.get(0)?;
    let project_id: String = row.get(1)?;
    let status: String = row.get(4)?;
    let category: String = row.get(6)?;
    let allowed_paths: String = row.get(7)?;
    let forbidden_paths: String = row.get(8)?;
    let verification_commands: String = row.get(9)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(Ticket {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        project_id: Uuid::parse_str(&project_id).unwrap_or_default(),
        title: row.get(2)?,
        description: row.get(3)?,
        status: parse_status(&status).unwrap_or(TicketStatus::Backlog),
        priority: row.get(5)?,
        shard: None,
        category: parse_category(&category).unwrap_or(TicketCategory::Fix),
        allowed_paths: serde_json::from_str(&allowed_paths).unwrap_or_default(),
        forbidden_paths: serde_json::from_str(&forbidden_paths).unwrap_or_default(),
        verification_commands: serde_json::from_str(&verification_commands).unwrap_or_default(),
        max_retries: row.get(10)?,
        retry_count: row.get(11)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

impl<'a> TicketRepository<'a> {
    pub fn new(adapter: &'a SqliteAdapter) -> Self {
        Self { adapter }
    }

    pub fn insert(&self, ticket: &Ticket) -> Result<()> {
        self.adapter.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO tickets (id, project_id, title, description, status, priority, \
                 shard, category, allowed_paths, forbidden_paths, verification_commands, \
                 max_retries, retry_count, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    ticket.id.to_string(),
                    ticket.project_id.to_string(),
                    ticket.title,
                    ticket.description,
                    status_str(ticket.status),
                    ticket.priority,
                    ticket.shard,
                    category_str(ticket.category),
                    serde_json::to_string(&ticket.allowed_paths)?,
                    serde_json::to_string(&ticket.forbidden_paths)?,
                    serde_json::to_string(&ticket.verification_commands)?,
                    ticket.max_retries,
                    ticket.retry_count,
                    ticket.created_at.to_rfc3339(),
                    ticket.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn find(&self, id: Uuid) -> Result<Ticket> {
        self.adapter.query(|conn| {
            conn.query_row(
                "SELECT id, project_id, title, description, status, priority, category, \
                 allowed_paths, forbidden_paths, verification_commands, max_retries, \
                 retry_count, created_at, updated_at FROM tickets WHERE id = ?1",
                params![id.to_string()],
                row_to_ticket,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    PersistenceError::NotFound(format!("ticket {id}"))
                }
                other => PersistenceError::Sqlite(other),
            })
        })
    }

    /// The single write path for ticket status: validates the edge against
    /// `TicketStatus::allowed_next` before touching the row.
    pub fn transition(&self, id: Uuid, next: TicketStatus) -> Result<()> {
        let current = self.find(id)?;
        if !current.status.can_transition_to(next) {
            return Err(PersistenceError::IllegalTransition {
                from: status_str(current.status).to_string(),
                to: status_str(next).to_string(),
            });
        }

        self.adapter.with_transaction(|tx| {
            tx.execute(
                "UPDATE tickets SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status_str(next), Utc::now().to_rfc3339(), id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn list_ready(&self, project_id: Uuid) -> Result<Vec<Ticket>> {
        self.adapter.query(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, title, description, status, priority, category, \
                 allowed_paths, forbidden_paths, verification_commands, max_retries, \
                 retry_count, created_at, updated_at FROM tickets \
                 WHERE project_id = ?1 AND status = 'ready' ORDER BY priority DESC, created_at ASC",
            )?;
            let rows = stmt
                .query_map(params![project_id.to_string()], row_to_ticket)?
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

    fn setup() -> (tempfile::TempDir, SqliteAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SqliteAdapter::open(&dir.path().join("ratchet.db"), 2).unwrap();
        (dir, adapter)
    }

    #[test]
    fn transition_rejects_illegal_edge() {
        let (_dir, adapter) = setup();
        let project = Project::new("demo", "/tmp/demo");
        ProjectRepository::new(&adapter).insert(&project).unwrap();

        let ticket = Ticket::new(project.id, "fix flaky test", TicketCategory::Fix, vec![]);
        let repo = TicketRepository::new(&adapter);
        repo.insert(&ticket).unwrap();

        let err = repo.transition(ticket.id, TicketStatus::Leased).unwrap_err();
        assert!(matches!(err, PersistenceError::IllegalTransition { .. }));
    }

    #[test]
    fn transition_allows_legal_edge_and_persists() {
        let (_dir, adapter) = setup();
        let project = Project::new("demo", "/tmp/demo");
        ProjectRepository::new(&adapter).insert(&project).unwrap();

        let ticket = Ticket::new(project.id, "fix flaky test", TicketCategory::Fix, vec![]);
        let repo = TicketRepository::new(&adapter);
        repo.insert(&ticket).unwrap();

        repo.transition(ticket.id, TicketStatus::Ready).unwrap();
        let reloaded = repo.find(ticket.id).unwrap();
        assert_eq!(reloaded.status, TicketStatus::Ready);
    }

    #[test]
    fn list_ready_orders_by_priority_then_age() {
        let (_dir, adapter) = setup();
        let project = Project::new("demo", "/tmp/demo");
        ProjectRepository::new(&adapter).insert(&project).unwrap();
        let repo = TicketRepository::new(&adapter);

        let mut low = Ticket::new(project.id, "low priority", TicketCategory::Cleanup, vec![]);
        low.priority = 1;
        let mut high = Ticket::new(project.id, "high priority", TicketCategory::Fix, vec![]);
        high.priority = 10;

        repo.insert(&low).unwrap();
        repo.insert(&high).unwrap();
        repo.transition(low.id, TicketStatus::Ready).unwrap();
        repo.transition(high.id, TicketStatus::Ready).unwrap();

        let ready = repo.list_ready(project.id).unwrap();
        assert_eq!(ready[0].id, high.id);
    }
}
