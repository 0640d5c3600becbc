//! Database utilities for connections and schema migrations.
//!
//! This module provides:
//! - SQLite connection helpers: [`connection::connect_sqlite`] applies WAL, foreign_keys=ON,
//!   a 5000ms busy_timeout and synchronous=FULL.
//! - Embedded Diesel migrations and runners: [`migrate::run_sqlite`] and [`migrate::run_all`].
//! - [`handle::Db`], the shared connection the stores run their queries on.
//!
//! Example:
//! ```no_run
//! use series_sync::db::{connection, migrate};
//!
//! let db_path = std::env::temp_dir().join("series_sync_example.db");
//! migrate::run_all(db_path.to_str().unwrap()).expect("migrations");
//!
//! let _conn = connection::connect_sqlite(db_path.to_str().unwrap()).expect("connect");
//! ```

pub mod connection;
pub mod handle;
pub mod migrate;

pub use handle::Db;
