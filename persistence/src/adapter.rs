use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction};

use crate::connection::initialize_pool;
use crate::error::Result;
use crate::migrations::migrate_to_latest;

/// Narrow adapter over the connection pool. Repositories depend on this
/// rather than on `rusqlite` directly so the storage engine can be swapped
/// without touching pipeline code.
pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAdapter {
    pub fn open(db_path: &Path, pool_size: u32) -> Result<Self> {
        let pool = initialize_pool(db_path, pool_size)?;
        let adapter = Self { pool };
        adapter.migrate()?;
        Ok(adapter)
    }

    pub fn get(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| crate::error::PersistenceError::Pool(e.to_string()))
    }

    /// Run a read query against a pooled connection.
    pub fn query<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.get()?;
        f(&conn)
    }

    /// Run `operation` inside a transaction on a pooled connection.
    pub fn with_transaction<F, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let mut conn = self.get()?;
        crate::transactions::with_transaction(&mut conn, operation)
    }

    pub fn migrate(&self) -> Result<()> {
        let mut conn = self.get()?;
        migrate_to_latest(&mut conn)
    }

    /// Dropping the adapter closes every pooled connection; this is a
    /// named no-op for callers that want an explicit shutdown point.
    pub fn close(self) {}
}
