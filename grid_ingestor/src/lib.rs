//! Grid-data models and upstream fetchers.
//!
//! [`models`] holds the series vocabulary shared with the ingestion core,
//! [`providers`] the [`SeriesFetcher`](providers::SeriesFetcher) seam and its
//! REST implementation, and [`requests`] the chunked window retrieval built
//! on top of it.

pub mod models;
pub mod providers;
pub mod requests;
