//! Storage error shared by the watermark and raw stores.

use thiserror::Error;

/// Failure talking to, or reading back from, the SQLite database.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("could not open database: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),

    /// A stored value no longer parses (bad timestamp, unknown domain, ...).
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// An observation handed to a store call belongs to another series.
    #[error("observation for {got} passed to a call for {expected}")]
    SeriesMismatch { expected: String, got: String },

    #[error("database connection mutex poisoned")]
    Poisoned,

    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
