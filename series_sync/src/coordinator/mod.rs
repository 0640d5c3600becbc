//! Ingestion coordinator: fetch → validate → persist → advance watermark.
//!
//! One run handles one series and walks the states
//! `Idle → Fetching → Validating → Persisting → AdvancingWatermark → Done`,
//! looping through the middle three once per fetched sub-range. A run ends in
//! `Failed` on retryable trouble (exhausted upstream retries, storage errors,
//! cancellation) and in `Aborted` on fatal trouble (rejected credentials, a
//! watermark regression). Either way the watermark is left untouched, while
//! chunks merged before the failure stay stored; replaying them later is a
//! no-op.
//!
//! The watermark only moves once per run, after the whole window went
//! through, and only as far as the stored slots are contiguous.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::StreamExt;
use grid_ingestor::{
    models::{series::SeriesKey, window::FetchWindow},
    providers::{FetchError, FetchErrorKind, SeriesFetcher},
    requests::chunked::{self, DEFAULT_CHUNK_MONTHS},
};
use thiserror::Error;
use tokio::{sync::watch, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
    coverage::{self, ExpectedSlots},
    error::StoreError,
    raw_store::{MergeReport, RawStore},
    run_lock::RunLockStore,
    tz::{self, TzError},
    validation::{self, DomainRules},
    watermark::{RegressionError, WatermarkError, WatermarkStore},
};

pub mod lock;
pub mod retry;

use lock::{SeriesGuard, SeriesLocks};
use retry::{RetryPolicy, Retrying};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Validating,
    Persisting,
    AdvancingWatermark,
    Done,
    Failed,
    Aborted,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("storage failed: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Regression(#[from] RegressionError),
    #[error("run cancelled")]
    Cancelled,
}

/// What one run did, filled in as it progresses.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub series: SeriesKey,
    pub window: Option<FetchWindow>,
    /// Sub-ranges fetched successfully.
    pub chunks: usize,
    pub fetched: usize,
    pub rejected: usize,
    pub merge: MergeReport,
    pub watermark_before: Option<DateTime<Utc>>,
    pub watermark_after: Option<DateTime<Utc>>,
    /// Every state entered, in order.
    pub transitions: Vec<RunState>,
}

impl RunReport {
    fn new(series: SeriesKey) -> Self {
        Self {
            series,
            window: None,
            chunks: 0,
            fetched: 0,
            rejected: 0,
            merge: MergeReport::default(),
            watermark_before: None,
            watermark_after: None,
            transitions: vec![RunState::Idle],
        }
    }

    pub fn advanced(&self) -> bool {
        self.watermark_after != self.watermark_before
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Done(RunReport),
    Failed {
        report: RunReport,
        error: CoordinatorError,
    },
    Aborted {
        report: RunReport,
        error: CoordinatorError,
    },
    /// Another run of the same series was in flight; nothing was done.
    AlreadyRunning(SeriesKey),
}

impl RunOutcome {
    /// Terminal state, `None` for [`RunOutcome::AlreadyRunning`].
    pub fn state(&self) -> Option<RunState> {
        match self {
            RunOutcome::Done(_) => Some(RunState::Done),
            RunOutcome::Failed { .. } => Some(RunState::Failed),
            RunOutcome::Aborted { .. } => Some(RunState::Aborted),
            RunOutcome::AlreadyRunning(_) => None,
        }
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Done(report)
            | RunOutcome::Failed { report, .. }
            | RunOutcome::Aborted { report, .. } => Some(report),
            RunOutcome::AlreadyRunning(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CoordinatorError> {
        match self {
            RunOutcome::Failed { error, .. } | RunOutcome::Aborted { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, RunOutcome::Done(_))
    }
}

/// Knobs of the coordinator; see `SyncConfig` for where they come from.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub chunk_months: u32,
    pub retry: RetryPolicy,
    /// Timeout of one upstream attempt.
    pub request_timeout: Duration,
    pub initial_lookback_years: u32,
    pub market_timezone: Tz,
    /// Age after which another coordinator's run lease may be taken over.
    /// Leases are renewed after every persisted sub-range.
    pub lock_stale_after: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            chunk_months: DEFAULT_CHUNK_MONTHS,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(60),
            initial_lookback_years: 3,
            market_timezone: chrono_tz::Europe::Amsterdam,
            lock_stale_after: Duration::from_secs(3_600),
        }
    }
}

/// In-flight bookkeeping of one run.
struct Run {
    report: RunReport,
    state: RunState,
}

impl Run {
    fn new(series: SeriesKey) -> Self {
        Self {
            report: RunReport::new(series),
            state: RunState::Idle,
        }
    }

    fn enter(&mut self, next: RunState) {
        debug!(series = %self.report.series, from = ?self.state, to = ?next, "state transition");
        self.state = next;
        self.report.transitions.push(next);
    }

    fn done(mut self) -> RunOutcome {
        self.enter(RunState::Done);
        let r = &self.report;
        info!(
            series = %r.series,
            chunks = r.chunks,
            fetched = r.fetched,
            rejected = r.rejected,
            written = r.merge.written(),
            corrected = r.merge.corrected,
            watermark = ?r.watermark_after,
            "run done"
        );
        RunOutcome::Done(self.report)
    }

    fn fail(mut self, error: CoordinatorError) -> RunOutcome {
        let at = self.state;
        self.enter(RunState::Failed);
        warn!(series = %self.report.series, state = ?at, %error, "run failed");
        RunOutcome::Failed {
            report: self.report,
            error,
        }
    }

    fn abort(mut self, error: CoordinatorError) -> RunOutcome {
        let at = self.state;
        self.enter(RunState::Aborted);
        error!(series = %self.report.series, state = ?at, %error, "run aborted");
        RunOutcome::Aborted {
            report: self.report,
            error,
        }
    }
}

/// Drives ingestion runs against explicit store handles.
pub struct Coordinator {
    fetcher: Arc<dyn SeriesFetcher>,
    watermarks: Arc<dyn WatermarkStore>,
    raw: Arc<dyn RawStore>,
    rules: DomainRules,
    settings: CoordinatorSettings,
    initial_starts: HashMap<SeriesKey, DateTime<Utc>>,
    locks: SeriesLocks,
}

impl Coordinator {
    pub fn new(
        fetcher: Arc<dyn SeriesFetcher>,
        watermarks: Arc<dyn WatermarkStore>,
        raw: Arc<dyn RawStore>,
    ) -> Self {
        Self {
            fetcher,
            watermarks,
            raw,
            rules: DomainRules::default(),
            settings: CoordinatorSettings::default(),
            initial_starts: HashMap::new(),
            locks: SeriesLocks::default(),
        }
    }

    pub fn with_rules(mut self, rules: DomainRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_settings(mut self, settings: CoordinatorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Inclusive start of `series`' first run, instead of the lookback.
    pub fn with_initial_start(mut self, series: SeriesKey, start: DateTime<Utc>) -> Self {
        self.initial_starts.insert(series, start);
        self
    }

    /// Leases every run in `store` as well, so coordinators sharing the
    /// database exclude each other.
    pub fn with_run_locks(mut self, store: Arc<dyn RunLockStore>) -> Self {
        self.locks = SeriesLocks::shared(store);
        self
    }

    pub fn locks(&self) -> &SeriesLocks {
        &self.locks
    }

    /// Default exclusive end of a window: start of today in the market zone.
    pub fn horizon(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, TzError> {
        tz::day_floor_in(self.settings.market_timezone, now)
    }

    fn initial_start(&self, series: &SeriesKey, until: DateTime<Utc>) -> DateTime<Utc> {
        self.initial_starts
            .get(series)
            .copied()
            .unwrap_or_else(|| tz::years_before(until, self.settings.initial_lookback_years))
    }

    /// Ingests everything after the watermark of `series` up to `until`
    /// (exclusive). Without a watermark the window starts at the configured
    /// initial start.
    pub async fn run_series(&self, series: &SeriesKey, until: DateTime<Utc>) -> RunOutcome {
        self.run_series_with_cancel(series, until, std::future::pending())
            .await
    }

    /// [`Coordinator::run_series`] that stops once `cancel` completes.
    ///
    /// Cancellation is observed while waiting on upstream; a storage step
    /// already under way finishes first. The run reports `Failed` with what
    /// it did so far and releases the series.
    pub async fn run_series_with_cancel<C>(
        &self,
        series: &SeriesKey,
        until: DateTime<Utc>,
        cancel: C,
    ) -> RunOutcome
    where
        C: Future<Output = ()>,
    {
        let guard = match self.acquire(series).await {
            Ok(Some(guard)) => guard,
            Ok(None) => return RunOutcome::AlreadyRunning(series.clone()),
            Err(e) => return Run::new(series.clone()).fail(e.into()),
        };
        let mut run = Run::new(series.clone());

        let before = match self.watermarks.get(series).await {
            Ok(wm) => wm.map(|w| w.last_complete),
            Err(e) => return run.fail(e.into()),
        };
        run.report.watermark_before = before;

        let window = match before {
            Some(wm) => FetchWindow::after(series.clone(), wm, until),
            None => FetchWindow::starting_at(series.clone(), self.initial_start(series, until), until),
        };
        self.execute(run, window, &guard, cancel).await
    }

    /// Ingests an explicit window, e.g. a backfill or replay. Stored data is
    /// merged as usual; the watermark still only moves forward and only over
    /// contiguous slots following it.
    pub async fn ingest_window(&self, window: FetchWindow) -> RunOutcome {
        let series = window.series.clone();
        let guard = match self.acquire(&series).await {
            Ok(Some(guard)) => guard,
            Ok(None) => return RunOutcome::AlreadyRunning(series),
            Err(e) => return Run::new(series).fail(e.into()),
        };
        let mut run = Run::new(series.clone());

        match self.watermarks.get(&series).await {
            Ok(wm) => run.report.watermark_before = wm.map(|w| w.last_complete),
            Err(e) => return run.fail(e.into()),
        }
        self.execute(run, window, &guard, std::future::pending())
            .await
    }

    async fn acquire(&self, series: &SeriesKey) -> Result<Option<SeriesGuard>, StoreError> {
        let guard = self
            .locks
            .try_acquire(series, self.settings.lock_stale_after)
            .await?;
        if guard.is_none() {
            info!(%series, "run already in flight");
        }
        Ok(guard)
    }

    /// Runs every series in its own task. Setting `cancel` to `true` cancels
    /// all runs still in flight. Outcomes are ordered by series.
    pub async fn run_all(
        self: &Arc<Self>,
        series: Vec<SeriesKey>,
        until: DateTime<Utc>,
        cancel: watch::Receiver<bool>,
    ) -> Vec<(SeriesKey, RunOutcome)> {
        let mut tasks = JoinSet::new();
        for key in series {
            let this = Arc::clone(self);
            let mut cancel = cancel.clone();
            tasks.spawn(async move {
                let cancelled = async move {
                    let closed = cancel.wait_for(|c| *c).await.is_err();
                    if closed {
                        // Sender gone without cancelling: never cancel.
                        std::future::pending::<()>().await;
                    }
                };
                let outcome = this.run_series_with_cancel(&key, until, cancelled).await;
                (key, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => outcomes.push(pair),
                Err(e) => error!(error = %e, "series task panicked"),
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }

    async fn execute<C>(
        &self,
        mut run: Run,
        window: FetchWindow,
        guard: &SeriesGuard,
        cancel: C,
    ) -> RunOutcome
    where
        C: Future<Output = ()>,
    {
        let series = window.series.clone();
        let rule = self.rules.get(series.domain);
        let expected = ExpectedSlots::for_window(&window, rule.resolution);
        run.report.window = Some(window.clone());
        run.report.watermark_after = run.report.watermark_before;

        if expected.is_empty() {
            info!(%series, %window, "series up to date, nothing to fetch");
            return run.done();
        }
        info!(%series, %window, expected = expected.count, "starting run");

        let retrying = Retrying::new(
            self.fetcher.as_ref(),
            self.settings.retry,
            self.settings.request_timeout,
        );
        let mut chunks = chunked::fetch(&retrying, &window, self.settings.chunk_months);
        tokio::pin!(cancel);

        run.enter(RunState::Fetching);
        loop {
            let next = tokio::select! {
                next = chunks.next() => next,
                () = &mut cancel => return run.fail(CoordinatorError::Cancelled),
            };
            let Some(chunk) = next else { break };
            let observations = match chunk.result {
                // Sub-ranges start inclusive; the watermark slot itself is already stored.
                Ok(mut observations) => {
                    if !window.from_inclusive {
                        observations.retain(|o| o.timestamp != window.from);
                    }
                    observations
                }
                Err(e) if e.kind() == FetchErrorKind::Auth => return run.abort(e.into()),
                Err(e) => return run.fail(e.into()),
            };
            run.report.chunks += 1;
            run.report.fetched += observations.len();

            run.enter(RunState::Validating);
            let validated = validation::validate(&window, &rule, observations);
            for (ts, reason) in &validated.rejected {
                warn!(%series, %ts, %reason, "rejected observation");
            }
            run.report.rejected += validated.rejected.len();

            run.enter(RunState::Persisting);
            match self.raw.merge(&series, validated.accepted).await {
                Ok(merged) => run.report.merge.absorb(merged),
                Err(e) => return run.fail(e.into()),
            }
            debug!(%series, range = %chunk.range, "chunk persisted");
            guard.renew().await;
            run.enter(RunState::Fetching);
        }
        drop(chunks);

        run.enter(RunState::AdvancingWatermark);
        let before = run.report.watermark_before;
        let coverage_window = match before {
            Some(wm) => FetchWindow::after(series.clone(), wm, window.to),
            None => window.clone(),
        };
        let expected = ExpectedSlots::for_window(&coverage_window, rule.resolution);
        if expected.is_empty() {
            return run.done();
        }

        let present = match self
            .raw
            .timestamps(&series, expected.first_start(), coverage_window.to)
            .await
        {
            Ok(present) => present,
            Err(e) => return run.fail(e.into()),
        };

        match coverage::contiguous_until(&expected, present) {
            Some(candidate) if before.is_none_or(|wm| candidate > wm) => {
                match self.watermarks.advance(&series, candidate).await {
                    Ok(wm) => run.report.watermark_after = Some(wm.last_complete),
                    Err(WatermarkError::Regression(e)) => return run.abort(e.into()),
                    Err(WatermarkError::Store(e)) => return run.fail(e.into()),
                }
            }
            Some(_) => {}
            None => {
                warn!(%series, from = %expected.first_start(), "first expected slot missing, watermark stays");
            }
        }
        run.done()
    }
}
