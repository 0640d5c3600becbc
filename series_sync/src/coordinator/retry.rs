//! Bounded retry with exponential backoff around a [`SeriesFetcher`].
//!
//! Every attempt runs under a timeout; expiry counts as an upstream error.
//! `Upstream` failures back off exponentially, `RateLimited` waits for the
//! upstream hint when there is one (never longer than `max_delay`), and both
//! draw from the same attempt budget. `Auth` and other permanent errors are returned immediately.

use std::time::Duration;

use async_trait::async_trait;
use grid_ingestor::{
    models::{observation::Observation, series::SeriesKey, window::SubRange},
    providers::{FetchError, FetchErrorKind, SeriesFetcher, UpstreamSnafu},
};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per sub-range, first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `base_delay * 2^attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// [`SeriesFetcher`] adapter applying a [`RetryPolicy`] and a per-attempt timeout.
pub struct Retrying<'a, F: ?Sized> {
    inner: &'a F,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<'a, F: SeriesFetcher + ?Sized> Retrying<'a, F> {
    pub fn new(inner: &'a F, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            timeout,
        }
    }

    async fn attempt(
        &self,
        series: &SeriesKey,
        range: SubRange,
    ) -> Result<Vec<Observation>, FetchError> {
        match tokio::time::timeout(self.timeout, self.inner.fetch_range(series, range)).await {
            Ok(result) => result,
            Err(_) => UpstreamSnafu {
                message: format!("request timed out after {:?}", self.timeout),
            }
            .fail(),
        }
    }
}

#[async_trait]
impl<'a, F> SeriesFetcher for Retrying<'a, F>
where
    F: SeriesFetcher + ?Sized,
{
    async fn fetch_range(
        &self,
        series: &SeriesKey,
        range: SubRange,
    ) -> Result<Vec<Observation>, FetchError> {
        let mut attempt = 0u32;
        loop {
            let err = match self.attempt(series, range).await {
                Ok(observations) => return Ok(observations),
                Err(e) => e,
            };

            let delay = match err.kind() {
                FetchErrorKind::Auth | FetchErrorKind::Permanent => return Err(err),
                FetchErrorKind::RateLimited => err.retry_after().map_or_else(
                    || self.policy.backoff(attempt),
                    |hint| hint.min(self.policy.max_delay),
                ),
                FetchErrorKind::Retryable => self.policy.backoff(attempt),
            };

            attempt += 1;
            if attempt >= self.policy.max_attempts {
                warn!(%series, %range, attempt, error = %err, "giving up on sub-range");
                return Err(err);
            }
            warn!(%series, %range, attempt, ?delay, error = %err, "retrying sub-range");
            tokio::time::sleep(delay).await;
        }
    }
}
