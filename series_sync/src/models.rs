//! Diesel models mapping to the database schema.
//!
//! These types mirror the tables defined in the embedded migrations and in
//! [`crate::schema`]:
//! - [`crate::schema::series_watermark`]: per-series progress
//! - [`crate::schema::observation`]: raw observations keyed by series and timestamp
//! - [`crate::schema::observation_correction`]: audit trail of overwritten payloads
//! - [`crate::schema::series_run_lock`]: cross-process run leases
//!
//! All timestamps are RFC 3339 UTC strings written by [`crate::tz::to_rfc3339_millis`].

use diesel::prelude::*;

use crate::schema::*;

/// A row in [`crate::schema::series_watermark`].
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = series_watermark, check_for_backend(diesel::sqlite::Sqlite))]
pub struct WatermarkRow {
    /// Domain code, e.g. "day_ahead_price".
    pub domain: String,
    /// Normalized region code, e.g. "NL".
    pub region: String,
    /// Last instant up to which the series is contiguously persisted.
    pub last_complete_ts: String,
    /// When the watermark last moved.
    pub updated_at: String,
}

/// Insertable and update form of [`WatermarkRow`].
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = series_watermark)]
pub struct NewWatermark<'a> {
    pub domain: &'a str,
    pub region: &'a str,
    pub last_complete_ts: &'a str,
    pub updated_at: &'a str,
}

/// A row in [`crate::schema::observation`].
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = observation, check_for_backend(diesel::sqlite::Sqlite))]
pub struct ObservationRow {
    pub domain: String,
    pub region: String,
    /// Interval start.
    pub ts: String,
    /// Canonical JSON of the domain payload.
    pub payload: String,
    /// 1 on first write, bumped on every correction.
    pub revision: i32,
    pub first_written_at: String,
    pub updated_at: String,
}

/// Insertable form of [`ObservationRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = observation)]
pub struct NewObservation<'a> {
    pub domain: &'a str,
    pub region: &'a str,
    pub ts: &'a str,
    pub payload: &'a str,
    pub revision: i32,
    pub first_written_at: &'a str,
    pub updated_at: &'a str,
}

/// A row in [`crate::schema::observation_correction`].
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = observation_correction, check_for_backend(diesel::sqlite::Sqlite))]
pub struct CorrectionRow {
    pub id: i32,
    pub domain: String,
    pub region: String,
    pub ts: String,
    pub previous_payload: String,
    pub new_payload: String,
    /// Revision the observation has after this correction.
    pub revision: i32,
    pub corrected_at: String,
}

/// Insertable form of [`CorrectionRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = observation_correction)]
pub struct NewCorrection<'a> {
    pub domain: &'a str,
    pub region: &'a str,
    pub ts: &'a str,
    pub previous_payload: &'a str,
    pub new_payload: &'a str,
    pub revision: i32,
    pub corrected_at: &'a str,
}

/// A row in [`crate::schema::series_run_lock`].
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = series_run_lock, check_for_backend(diesel::sqlite::Sqlite))]
pub struct RunLockRow {
    pub domain: String,
    pub region: String,
    /// Identity of the coordinator holding the lease.
    pub holder: String,
    /// Claim time, refreshed while the run makes progress.
    pub acquired_at: String,
}

/// Insertable form of [`RunLockRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = series_run_lock)]
pub struct NewRunLock<'a> {
    pub domain: &'a str,
    pub region: &'a str,
    pub holder: &'a str,
    pub acquired_at: &'a str,
}
