//! Run leases shared by every process that opens the same database.
//!
//! The in-process lock in [`crate::coordinator::lock`] only sees runs of its
//! own coordinator. A lease row keeps two `series-sync run` invocations from
//! working on one series at the same time.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grid_ingestor::models::series::SeriesKey;

use crate::error::StoreError;

pub mod repo;

pub use repo::SqliteRunLockStore;

/// A live claim on a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLease {
    pub series: SeriesKey,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

#[async_trait]
pub trait RunLockStore: Send + Sync {
    /// Claims `series` for `holder`.
    ///
    /// Returns `false` while another holder's lease is younger than
    /// `stale_after`; an older lease is taken over.
    async fn try_claim(
        &self,
        series: &SeriesKey,
        holder: &str,
        stale_after: Duration,
    ) -> Result<bool, StoreError>;

    /// Refreshes the claim time of a lease `holder` still owns.
    async fn renew(&self, series: &SeriesKey, holder: &str) -> Result<(), StoreError>;

    /// Drops the lease if `holder` still owns it.
    ///
    /// Synchronous so a guard can release from `Drop`.
    fn release(&self, series: &SeriesKey, holder: &str) -> Result<(), StoreError>;

    /// Every lease currently stored, ordered by domain then region.
    async fn list(&self) -> Result<Vec<RunLease>, StoreError>;
}
