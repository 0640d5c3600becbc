//! Embedded schema migrations.

use anyhow::anyhow;
use diesel::connection::SimpleConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::db::connection;

/// Embedded Diesel migrations bundled with this crate.
///
/// These are applied by [`run_sqlite`] to bring the database schema up to date.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Runs pending Diesel migrations on a SQLite database at the given URL.
///
/// Switches the file to WAL first; the journal mode is persistent per file.
pub fn run_sqlite(url: &str) -> anyhow::Result<usize> {
    let mut conn = connection::connect(url)?;
    conn.batch_execute("PRAGMA journal_mode=WAL;")?;
    let applied = conn.run_pending_migrations(MIGRATIONS).map_err(|e| anyhow!(e))?;

    Ok(applied.len())
}

/// Runs pending migrations for `database_url`.
///
/// Only SQLite is supported: bare paths, `sqlite:` urls and `:memory:`.
pub fn run_all(database_url: &str) -> anyhow::Result<usize> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        anyhow::bail!("Unsupported DATABASE_URL (only SQLite is supported): {database_url}");
    }
    run_sqlite(database_url)
}

#[cfg(test)]
mod test {
    use super::*;
    use diesel::{Connection, SqliteConnection};

    #[test]
    fn migrations_apply_on_temp_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let path = temp.path().to_string_lossy().to_string();

        let applied = run_sqlite(&path).expect("migration run");
        assert_eq!(applied, 1);
        assert_eq!(run_sqlite(&path).expect("second run"), 0);

        let mut conn = SqliteConnection::establish(&path).unwrap();
        conn.batch_execute(
            "INSERT INTO series_watermark (domain, region, last_complete_ts, updated_at) \
             VALUES ('generation', 'NL', '2024-01-01T00:00:00.000Z', '2024-01-01T00:00:00.000Z')",
        )
        .unwrap();
    }

    #[test]
    fn postgres_urls_are_rejected() {
        assert!(run_all("postgres://localhost/grid").is_err());
    }
}
