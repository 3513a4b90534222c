//! ACID transaction helpers shared by every repository.

use rusqlite::{Connection, Transaction};

use crate::error::Result;

/// Run `operation` inside a transaction, committing on `Ok` and rolling
/// back (via `rusqlite`'s drop semantics) on `Err`.
pub fn with_transaction<F, T>(conn: &mut Connection, operation: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction()?;
    let result = operation(&tx)?;
    tx.commit()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::migrate_to_latest;

    #[test]
    fn rolls_back_on_error() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to_latest(&mut conn).unwrap();

        let result: Result<()> = with_transaction(&mut conn, |tx| {
            tx.execute(
                "INSERT INTO projects (id, name, remote_url, root_path, created_at, updated_at) \
                 VALUES ('p1', 'demo', NULL, '/tmp/demo', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Err(crate::error::PersistenceError::Migration("force rollback".into()))
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn commits_on_success() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to_latest(&mut conn).unwrap();

        with_transaction(&mut conn, |tx| {
            tx.execute(
                "INSERT INTO projects (id, name, remote_url, root_path, created_at, updated_at) \
                 VALUES ('p1', 'demo', NULL, '/tmp/demo', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
