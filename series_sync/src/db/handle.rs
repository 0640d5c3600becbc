//! Shared, async-friendly handle to one SQLite connection.
//!
//! Diesel's SQLite backend is synchronous; every store call is moved onto the
//! blocking pool with [`tokio::task::spawn_blocking`] and serialized through a
//! mutex. Writes from different series therefore never interleave inside a
//! transaction.

use std::sync::{Arc, Mutex};

use diesel::SqliteConnection;

use crate::{db::connection::connect_sqlite, error::StoreError};

#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<SqliteConnection>>,
}

impl Db {
    /// Opens `database_url` with [`connect_sqlite`].
    pub fn open(database_url: &str) -> Result<Self, StoreError> {
        Ok(Self::from_connection(connect_sqlite(database_url)?))
    }

    pub fn from_connection(conn: SqliteConnection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs `f` with exclusive access to the connection on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        self.run_with(f).await
    }

    /// Same as [`Db::run`] for callers with their own error type.
    pub async fn run_with<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| E::from(StoreError::Poisoned))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| E::from(StoreError::Join(e)))?
    }

    /// Runs `f` on the calling thread, blocking it until the connection is
    /// free. For drop paths that cannot await.
    pub fn run_blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StoreError>,
    {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut guard)
    }
}
