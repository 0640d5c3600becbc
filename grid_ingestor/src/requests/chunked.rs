//! Lazy, chunked retrieval of a whole [`FetchWindow`].
//!
//! The window is split into calendar sub-ranges and each one is requested only
//! when the stream is polled, so a consumer can persist chunk by chunk and
//! stop early. Dropping the stream and calling [`fetch`] again with a window
//! that starts later resumes from there.

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, warn};

use crate::{
    models::{observation::Observation, window::FetchWindow, window::SubRange},
    providers::{FetchError, SeriesFetcher},
};

/// Default sub-range size in calendar months.
pub const DEFAULT_CHUNK_MONTHS: u32 = 3;

/// Outcome of one sub-range request.
#[derive(Debug)]
pub struct FetchedChunk {
    pub range: SubRange,
    pub result: Result<Vec<Observation>, FetchError>,
}

/// Streams the window's sub-ranges in ascending order, one request each.
///
/// Observations are sorted by timestamp within a chunk. Errors are yielded,
/// not swallowed; the consumer decides whether to continue with the next
/// chunk or stop.
pub fn fetch<'a, F>(
    fetcher: &'a F,
    window: &FetchWindow,
    chunk_months: u32,
) -> BoxStream<'a, FetchedChunk>
where
    F: SeriesFetcher + ?Sized,
{
    let series = window.series.clone();
    let ranges = window.sub_ranges(chunk_months);
    debug!(%window, chunks = ranges.len(), "planned sub-ranges");

    stream::iter(ranges)
        .then(move |range| {
            let series = series.clone();
            async move {
                let result = fetcher.fetch_range(&series, range).await.map(|mut obs| {
                    obs.sort_by_key(|o| o.timestamp);
                    obs
                });
                if let Err(e) = &result {
                    warn!(%series, %range, error = %e, "sub-range fetch failed");
                }
                FetchedChunk { range, result }
            }
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        models::{domain::Domain, series::SeriesKey},
        providers::UpstreamSnafu,
    };

    /// Records every requested range; fails the ranges listed in `fail`.
    struct Recording {
        calls: Mutex<Vec<SubRange>>,
        fail: Vec<usize>,
    }

    #[async_trait]
    impl SeriesFetcher for Recording {
        async fn fetch_range(
            &self,
            series: &SeriesKey,
            range: SubRange,
        ) -> Result<Vec<Observation>, FetchError> {
            let idx = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(range);
                calls.len() - 1
            };
            if self.fail.contains(&idx) {
                return UpstreamSnafu { message: "boom" }.fail();
            }
            Ok(vec![
                Observation::price(series.clone(), range.end - chrono::Duration::hours(1), 2.0),
                Observation::price(series.clone(), range.start, 1.0),
            ])
        }
    }

    fn window() -> FetchWindow {
        FetchWindow::starting_at(
            SeriesKey::new(Domain::DayAheadPrice, "NL").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn nothing_is_requested_until_polled() {
        let fetcher = Recording {
            calls: Mutex::new(vec![]),
            fail: vec![],
        };
        let w = window();
        let mut chunks = fetch(&fetcher, &w, 3);
        assert!(fetcher.calls.lock().unwrap().is_empty());

        let first = chunks.next().await.unwrap();
        assert_eq!(fetcher.calls.lock().unwrap().len(), 1);
        let obs = first.result.unwrap();
        assert!(obs[0].timestamp < obs[1].timestamp);
    }

    #[tokio::test]
    async fn failed_chunk_is_yielded_and_stream_continues() {
        let fetcher = Recording {
            calls: Mutex::new(vec![]),
            fail: vec![0],
        };
        let chunks: Vec<_> = fetch(&fetcher, &window(), 3).collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].result.is_err());
        assert_eq!(chunks[1].result.as_ref().map(Vec::len).unwrap(), 2);
    }
}
