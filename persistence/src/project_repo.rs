use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use ratchet_types::Project;
use uuid::Uuid;

use crate::adapter::SqliteAdapter;
use crate::error::{PersistenceError, Result};

pub struct ProjectRepository<'a> {
    adapter: &'a SqliteAdapter,
}

fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(Project {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        name: row.get(1)?,
        remote_url: row.get(2)?,
        root_path: row.get(3)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl<'a> ProjectRepository<'a> {
    pub fn new(adapter: &'a SqliteAdapter) -> Self {
        Self { adapter }
    }

    pub fn insert(&self, project: &Project) -> Result<()> {
        self.adapter.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO projects (id, name, remote_url, root_path, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    project.id.to_string(),
                    project.name,
                    project.remote_url,
                    project.root_path,
                    project.created_at.to_rfc3339(),
                    project.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn find(&self, id: Uuid) -> Result<Project> {
        self.adapter.query(|conn| {
            conn.query_row(
                "SELECT id, name, remote_url, root_path, created_at, updated_at \
                 FROM projects WHERE id = ?1",
                params![id.to_string()],
                row_to_project,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    PersistenceError::NotFound(format!("project {id}"))
                }
                other => PersistenceError::Sqlite(other),
            })
        })
    }

    pub fn find_by_root_path(&self, root_path: &str) -> Result<Option<Project>> {
        self.adapter.query(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, remote_url, root_path, created_at, updated_at \
                 FROM projects WHERE root_path = ?1",
            )?;
            let mut rows = stmt.query(params![root_path])?;
            if let Some(row) = rows.next()? {
                Ok(Some(row_to_project(row)?))
            } else {
                Ok(None)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_find_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SqliteAdapter::open(&dir.path().join("ratchet.db"), 2).unwrap();
        let repo = ProjectRepository::new(&adapter);

        let project = Project::new("demo", "/tmp/demo");
        repo.insert(&project).unwrap();

        let found = repo.find(project.id).unwrap();
        assert_eq!(found.name, "demo");
        assert_eq!(found.root_path, "/tmp/demo");
    }

    #[test]
    fn find_missing_project_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SqliteAdapter::open(&dir.path().join("ratchet.db"), 2).unwrap();
        let repo = ProjectRepository::new(&adapter);

        let err = repo.find(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }
}
