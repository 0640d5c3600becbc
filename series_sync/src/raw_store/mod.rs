//! Raw observation store with merge semantics.
//!
//! Observations are keyed by `(series, timestamp)`. Merging the same payload
//! again is a no-op, a different payload overwrites the stored one and is
//! recorded in the correction audit, so replays never duplicate rows.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use grid_ingestor::models::{domain::Domain, observation::Observation, series::SeriesKey};
use serde::Serialize;

use crate::error::StoreError;

pub mod repo;

pub use repo::SqliteRawStore;

/// What one [`RawStore::merge`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub inserted: usize,
    /// Existing timestamps whose payload changed.
    pub corrected: usize,
    /// Existing timestamps with an identical payload.
    pub unchanged: usize,
}

impl MergeReport {
    /// Rows actually written.
    pub fn written(&self) -> usize {
        self.inserted + self.corrected
    }

    pub fn absorb(&mut self, other: MergeReport) {
        self.inserted += other.inserted;
        self.corrected += other.corrected;
        self.unchanged += other.unchanged;
    }
}

/// One audited overwrite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub series: SeriesKey,
    pub timestamp: DateTime<Utc>,
    pub previous_payload: String,
    pub new_payload: String,
    /// Revision the observation has after this correction.
    pub revision: i32,
    pub corrected_at: DateTime<Utc>,
}

/// Row count and time span stored for one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeriesSummary {
    pub rows: i64,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

/// Portable surface, SQLite implementation lives in `repo.rs`.
#[async_trait]
pub trait RawStore: Send + Sync {
    /// Upserts `observations` into `series` in one transaction.
    ///
    /// Every observation must belong to `series`.
    async fn merge(
        &self,
        series: &SeriesKey,
        observations: Vec<Observation>,
    ) -> Result<MergeReport, StoreError>;

    /// Lazily reads `[from, to)` ordered by timestamp ascending.
    fn read_range(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> BoxStream<'static, Result<Observation, StoreError>>;

    /// Stored timestamps in `[from, to)`, ascending.
    async fn timestamps(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError>;

    /// Correction audit for `series`, oldest first.
    async fn corrections(&self, series: &SeriesKey) -> Result<Vec<Correction>, StoreError>;

    async fn summary(&self, series: &SeriesKey) -> Result<SeriesSummary, StoreError>;

    /// Regions with at least one stored observation for `domain`.
    async fn regions(&self, domain: Domain) -> Result<Vec<String>, StoreError>;
}
