//! Database module for the attendance console.
//!
//! Committed sessions are kept in SQLite. Nothing is written here unless the
//! operator explicitly commits a session; the live roster stays in memory.
//! The database is stored at `~/.attendance-console/attendance.db` unless the
//! storage config points elsewhere.

pub mod attendance;
pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;

use crate::database::migrations::run_migrations;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Nothing to commit: {0}")]
    NothingToCommit(String),
}

fn configure(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

/// Opens the database at `path`, creating its directory and applying
/// pending migrations.
pub fn open_database(path: &Path) -> Result<Connection, DatabaseError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
            tracing::info!("Created data directory at {:?}", dir);
        }
    }

    tracing::info!("Database path: {:?}", path);
    let mut conn = Connection::open(path)?;
    configure(&conn)?;
    run_migrations(&mut conn)?;
    Ok(conn)
}

/// Opens a migrated in-memory database.
pub fn open_in_memory() -> Result<Connection, DatabaseError> {
    let mut conn = Connection::open_in_memory()?;
    configure(&conn)?;
    run_migrations(&mut conn)?;
    Ok(conn)
}

pub use attendance::{
    commit_session, delete_committed_session, get_committed_entries, get_committed_session,
    list_committed_sessions, CommittedEntry, CommittedSession,
};
