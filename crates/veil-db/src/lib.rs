//! # veil-db
//!
//! Database access layer for the Veil client core.
//! Manages the single SQLite database at `$VEIL_DATA_DIR/veil.db`.
//!
//! ## Schema
//!
//! - WAL mode mandatory
//! - Foreign keys enforced
//! - Timestamps are Unix epoch values; seconds for job scheduling,
//!   milliseconds where the storage protocol requires them
//! - Schema version stored in `PRAGMA user_version`
//!
//! The durable store is the sole authority for job state: every state change
//! commits here before the corresponding in-memory effect is applied.

pub mod migrations;
pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// A connection shared across async tasks.
pub type SharedDb = Arc<tokio::sync::Mutex<Connection>>;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the Veil database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Wrap a connection for sharing across async tasks.
pub fn into_shared(conn: Connection) -> SharedDb {
    Arc::new(tokio::sync::Mutex::new(conn))
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}
