//! Schema versioning and migrations.
//!
//! Migrations are forward-only, idempotent (`CREATE TABLE IF NOT EXISTS`),
//! and tracked by id + checksum in `schema_migrations` so a mismatched
//! checksum on a previously-applied migration is caught rather than
//! silently re-applied.

use rusqlite::Connection;

use crate::error::{PersistenceError, Result};

struct Migration {
    id: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    id: 1,
    sql: r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    remote_url TEXT,
    root_path TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tickets (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id),
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL,
    priority INTEGER NOT NULL,
    shard TEXT,
    category TEXT NOT NULL,
    allowed_paths TEXT NOT NULL,
    forbidden_paths TEXT NOT NULL,
    verification_commands TEXT NOT NULL,
    max_retries INTEGER NOT NULL,
    retry_count INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tickets_project_status ON tickets(project_id, status);

CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    run_type TEXT NOT NULL,
    project_id TEXT NOT NULL REFERENCES projects(id),
    ticket_id TEXT REFERENCES tickets(id),
    status TEXT NOT NULL,
    iteration INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    terminal_error TEXT,
    metadata TEXT NOT NULL,
    pr_url TEXT
);
CREATE INDEX IF NOT EXISTS idx_runs_project_status ON runs(project_id, status);
CREATE INDEX IF NOT EXISTS idx_runs_ticket ON runs(ticket_id);

CREATE TABLE IF NOT EXISTS run_steps (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(id),
    attempt INTEGER NOT NULL,
    ordinal INTEGER NOT NULL,
    status TEXT NOT NULL,
    command TEXT NOT NULL,
    cwd TEXT NOT NULL,
    timeout_ms INTEGER NOT NULL,
    exit_code INTEGER,
    stdout_path TEXT,
    stderr_path TEXT,
    output_bytes INTEGER NOT NULL,
    truncated INTEGER NOT NULL,
    tail TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_run_steps_identity ON run_steps(run_id, attempt, ordinal);

CREATE TABLE IF NOT EXISTS events (
    run_id TEXT NOT NULL,
    step INTEGER NOT NULL,
    ts TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (run_id, step)
);
CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
"#,
}];

fn checksum(sql: &str) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            id INTEGER PRIMARY KEY,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn applied_checksum(conn: &Connection, id: i64) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT checksum FROM schema_migrations WHERE id = ?1")?;
    let mut rows = stmt.query([id])?;
    if let Some(row) = rows.next()? {
        Ok(Some(row.get(0)?))
    } else {
        Ok(None)
    }
}

/// Apply all migrations in order, bringing the database to the current
/// schema version. Safe to call on every startup.
pub fn migrate_to_latest(conn: &mut Connection) -> Result<()> {
    ensure_migrations_table(conn)?;

    for migration in MIGRATIONS {
        let sum = checksum(migration.sql);
        match applied_checksum(conn, migration.id)? {
            Some(existing) if existing == sum => continue,
            Some(existing) => {
                return Err(PersistenceError::Migration(format!(
                    "migration {} checksum mismatch: recorded {existing}, expected {sum}",
                    migration.id
                )));
            }
            None => {
                let tx = conn.transaction()?;
                tx.execute_batch(migration.sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (id, checksum, applied_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![
                        migration.id,
                        sum,
                        chrono::Utc::now().to_rfc3339(),
                    ],
                )?;
                tx.commit()?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_creates_all_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to_latest(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();

        for expected in ["projects", "tickets", "runs", "run_steps", "events"] {
            assert!(tables.contains(&expected.to_string()), "missing table {expected}");
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to_latest(&mut conn).unwrap();
        migrate_to_latest(&mut conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
