//! Watermark store: how far each series is contiguously persisted.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grid_ingestor::models::series::SeriesKey;

use crate::error::StoreError;

pub mod repo;

pub use repo::SqliteWatermarkStore;

/// Progress marker of one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub series: SeriesKey,
    /// Every expected slot up to and including this instant is persisted.
    pub last_complete: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("watermark for {series} would regress from {current} to {attempted}")]
/// Raised when an advance would move a watermark backwards.
pub struct RegressionError {
    pub series: SeriesKey,
    pub current: DateTime<Utc>,
    pub attempted: DateTime<Utc>,
}

#[derive(thiserror::Error, Debug)]
pub enum WatermarkError {
    #[error(transparent)]
    Regression(#[from] RegressionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<diesel::result::Error> for WatermarkError {
    fn from(e: diesel::result::Error) -> Self {
        WatermarkError::Store(e.into())
    }
}

/// Portable surface, SQLite implementation lives in `repo.rs`.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, series: &SeriesKey) -> Result<Option<Watermark>, StoreError>;

    /// Moves the watermark of `series` to `new_ts`.
    ///
    /// Creates it on first use. Advancing to the current value returns it
    /// without writing; a smaller value fails with [`RegressionError`].
    async fn advance(
        &self,
        series: &SeriesKey,
        new_ts: DateTime<Utc>,
    ) -> Result<Watermark, WatermarkError>;

    /// Every stored watermark, ordered by domain then region.
    async fn list(&self) -> Result<Vec<Watermark>, StoreError>;

    /// Deletes the watermark of `series`. Administrative only; returns whether
    /// one existed.
    async fn reset(&self, series: &SeriesKey) -> Result<bool, StoreError>;
}
