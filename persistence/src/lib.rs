//! SQLite-backed persistence for projects, tickets, runs, and run steps,
//! plus the per-session ndjson event journal.

pub mod adapter;
pub mod connection;
pub mod error;
pub mod eventlog;
pub mod migrations;
pub mod project_repo;
pub mod run_repo;
pub mod ticket_repo;
pub mod transactions;

pub use adapter::SqliteAdapter;
pub use error::{PersistenceError, Result};
pub use eventlog::RunDir;
pub use project_repo::ProjectRepository;
pub use run_repo::RunRepository;
pub use ticket_repo::TicketRepository;
