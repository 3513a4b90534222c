//! Connection pooling and pragma configuration, grounded on the teacher's
//! `r2d2`/`r2d2_sqlite` pool setup: WAL journaling, tuned cache and mmap
//! sizes, and a busy timeout instead of ad-hoc retry loops on `SQLITE_BUSY`.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::{PersistenceError, Result};

pub fn initialize_pool(db_path: &Path, pool_size: u32) -> Result<Pool<SqliteConnectionManager>> {
    let manager = SqliteConnectionManager::file(db_path);

    let pool = Pool::builder()
        .max_size(pool_size)
        .min_idle(Some(1))
        .connection_customizer(Box::new(ConnectionCustomizer))
        .test_on_check_out(true)
        .build(manager)
        .map_err(|e| PersistenceError::Pool(format!("failed to create connection pool: {e}")))?;

    let conn = pool
        .get()
        .map_err(|e| PersistenceError::Pool(format!("failed to get initial connection: {e}")))?;
    verify_pragmas(&conn)?;

    Ok(pool)
}

#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -32000;
             PRAGMA temp_store = MEMORY;
             PRAGMA mmap_size = 1073741824;
             PRAGMA busy_timeout = 5000;",
        )
    }
}

fn verify_pragmas(conn: &Connection) -> Result<()> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if journal_mode != "wal" {
        return Err(PersistenceError::Pool(format!(
            "WAL mode not enabled (got: {journal_mode})"
        )));
    }

    let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    if foreign_keys != 1 {
        return Err(PersistenceError::Pool(
            "foreign key enforcement not enabled".to_string(),
        ));
    }

    Ok(())
}
