//! Watermark-driven incremental ingestion of grid time series.
//!
//! - [`watermark`]: durable per-series progress that never regresses
//! - [`raw_store`]: observations with merge semantics and a correction audit
//! - [`coordinator`]: fetch → validate → persist → advance, one run per series at a time
//! - [`run_lock`]: database-backed run leases shared across processes
//! - [`validation`] and [`coverage`]: the per-domain rule table and gap-safe slot math
//! - [`config`], [`db`], [`tz`]: configuration, SQLite plumbing and time helpers

pub mod config;
pub mod coordinator;
pub mod coverage;
pub mod db;
pub mod error;
pub mod models;
pub mod raw_store;
pub mod run_lock;
pub mod schema;
pub mod tz;
pub mod validation;
pub mod watermark;
