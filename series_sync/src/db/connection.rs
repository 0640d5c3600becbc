//! SQLite connection helpers.
//!
//! Provides [`connect_sqlite`] that opens a connection and applies the PRAGMAs
//! the stores rely on: WAL journaling, foreign_keys=ON, a 5000ms busy_timeout
//! and synchronous=FULL so a committed watermark survives power loss.
//!
//! Example:
//! ```no_run
//! use series_sync::db::connection::connect_sqlite;
//!
//! let path = std::env::temp_dir().join("series_sync_example.db");
//! let _conn = connect_sqlite(path.to_str().unwrap()).expect("open sqlite");
//! ```

use diesel::{Connection, ConnectionError, RunQueryDsl, SqliteConnection, sql_query};

use crate::error::StoreError;

/// Strips an optional `sqlite://` or `sqlite:` scheme so bare paths and
/// scheme-qualified urls both work.
pub fn sqlite_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
}

/// Open a SQLite connection and apply connection-wide PRAGMAs.
pub fn connect_sqlite(database_url: &str) -> Result<SqliteConnection, StoreError> {
    let mut conn = SqliteConnection::establish(sqlite_path(database_url))?;

    sql_query("PRAGMA journal_mode=WAL;").execute(&mut conn)?;
    sql_query("PRAGMA foreign_keys=ON;").execute(&mut conn)?;
    sql_query("PRAGMA busy_timeout=5000;").execute(&mut conn)?;
    sql_query("PRAGMA synchronous=FULL;").execute(&mut conn)?;
    Ok(conn)
}

/// Same as [`connect_sqlite`] with the error type the migration edge uses.
pub fn connect(database_url: &str) -> Result<SqliteConnection, ConnectionError> {
    SqliteConnection::establish(sqlite_path(database_url))
}
