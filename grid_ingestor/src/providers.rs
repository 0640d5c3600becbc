//! Upstream abstraction for grid time-series sources.
//!
//! This module defines the [`SeriesFetcher`] trait, the single seam between the
//! ingestion core and whatever API serves day-ahead prices and generation
//! figures. A fetcher answers for one bounded sub-range at a time and follows
//! the upstream's pagination itself; splitting a long window into sub-ranges
//! and deciding what to retry are left to the caller (see
//! [`crate::requests::chunked`]).
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use grid_ingestor::models::{observation::Observation, series::SeriesKey, window::SubRange};
//! use grid_ingestor::providers::{FetchError, SeriesFetcher};
//!
//! struct Empty;
//!
//! #[async_trait]
//! impl SeriesFetcher for Empty {
//!     async fn fetch_range(
//!         &self,
//!         _series: &SeriesKey,
//!         _range: SubRange,
//!     ) -> Result<Vec<Observation>, FetchError> {
//!         Ok(vec![])
//!     }
//! }
//! ```

pub mod grid_rest;

use std::time::Duration;

use async_trait::async_trait;
use shared_utils::env::EnvError;
use snafu::{Backtrace, Snafu};

use crate::models::{observation::Observation, series::SeriesKey, window::SubRange};

/// Fetches observations for one series from an upstream API.
///
/// Implementations must be restartable: calling `fetch_range` twice with the
/// same arguments asks upstream again and returns whatever it serves now.
#[async_trait]
pub trait SeriesFetcher: Send + Sync {
    /// Fetches every observation upstream has for `series` in `range`
    /// (`start` inclusive, `end` exclusive), following pagination.
    async fn fetch_range(
        &self,
        series: &SeriesKey,
        range: SubRange,
    ) -> Result<Vec<Observation>, FetchError>;
}

#[async_trait]
impl<T> SeriesFetcher for std::sync::Arc<T>
where
    T: SeriesFetcher + ?Sized,
{
    async fn fetch_range(
        &self,
        series: &SeriesKey,
        range: SubRange,
    ) -> Result<Vec<Observation>, FetchError> {
        (**self).fetch_range(series, range).await
    }
}

/// Errors that can occur during the creation of a provider instance
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderInitError {
    /// missing or blank environment variable.
    #[snafu(display("Missing credentials: {source}"))]
    Credentials { source: EnvError, backtrace: Backtrace },

    /// failed to init reqwest client
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// token contains characters that cannot go into a header.
    #[snafu(display("Invalid API token format: {source}"))]
    InvalidToken {
        source: reqwest::header::InvalidHeaderValue,
        backtrace: Backtrace,
    },

    /// base url does not parse.
    #[snafu(display("Invalid base url {url:?}: {message}"))]
    InvalidBaseUrl {
        url: String,
        message: String,
        backtrace: Backtrace,
    },
}

/// Errors a [`SeriesFetcher`] reports for one request.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FetchError {
    /// Credentials were rejected (HTTP 401/403). Fatal for the run.
    #[snafu(display("Upstream rejected credentials: {message}"))]
    Auth {
        message: String,
        backtrace: Backtrace,
    },

    /// HTTP 429. `retry_after` carries the upstream hint when present.
    #[snafu(display("Upstream rate limit hit (retry after {retry_after:?})"))]
    RateLimited {
        retry_after: Option<Duration>,
        backtrace: Backtrace,
    },

    /// 5xx, malformed payload or timeout. Retryable.
    #[snafu(display("Upstream error: {message}"))]
    Upstream {
        message: String,
        backtrace: Backtrace,
    },

    /// Transport-level failure from the HTTP client.
    #[snafu(display("API request failed: {source}"))]
    Reqwest {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// Any other client error (4xx); the request itself is wrong.
    #[snafu(display("API error: {message}"))]
    Api {
        message: String,
        backtrace: Backtrace,
    },
}

/// Coarse classification the coordinator uses to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Auth,
    RateLimited,
    Retryable,
    Permanent,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Auth { .. } => FetchErrorKind::Auth,
            FetchError::RateLimited { .. } => FetchErrorKind::RateLimited,
            FetchError::Upstream { .. } => FetchErrorKind::Retryable,
            FetchError::Reqwest { source, .. } => {
                if is_transient(source) {
                    FetchErrorKind::Retryable
                } else {
                    FetchErrorKind::Permanent
                }
            }
            FetchError::Api { .. } => FetchErrorKind::Permanent,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_error_taxonomy() {
        let auth = AuthSnafu { message: "bad token" }.build();
        assert_eq!(auth.kind(), FetchErrorKind::Auth);

        let limited = RateLimitedSnafu {
            retry_after: Some(Duration::from_secs(30)),
        }
        .build();
        assert_eq!(limited.kind(), FetchErrorKind::RateLimited);
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(30)));

        let upstream = UpstreamSnafu { message: "502" }.build();
        assert_eq!(upstream.kind(), FetchErrorKind::Retryable);

        let api = ApiSnafu { message: "400" }.build();
        assert_eq!(api.kind(), FetchErrorKind::Permanent);
    }
}
