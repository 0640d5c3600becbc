#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use diesel::QueryableByName;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Text};
use futures::stream::BoxStream;
use grid_ingestor::{
    models::{domain::Domain, observation::Observation, series::SeriesKey, window::SubRange},
    providers::{FetchError, SeriesFetcher},
};
use series_sync::{
    coordinator::{Coordinator, CoordinatorSettings, retry::RetryPolicy},
    db::{Db, connection, migrate},
    error::StoreError,
    raw_store::{Correction, MergeReport, RawStore, SeriesSummary, SqliteRawStore},
    run_lock::SqliteRunLockStore,
    watermark::{SqliteWatermarkStore, Watermark, WatermarkError, WatermarkStore},
};
use tempfile::TempDir;
use tokio::sync::Semaphore;

#[derive(QueryableByName)]
struct JournalMode {
    #[diesel(sql_type = Text)]
    journal_mode: String,
}
#[derive(QueryableByName)]
struct ForeignKeys {
    #[diesel(sql_type = Integer)]
    foreign_keys: i32,
}
#[derive(QueryableByName)]
struct BusyTimeout {
    #[diesel(sql_type = Integer, column_name = "timeout")]
    busy_timeout: i32,
}
#[derive(QueryableByName)]
struct Synchronous {
    #[diesel(sql_type = Integer)]
    synchronous: i32,
}

pub struct TestDb {
    _dir: TempDir,    // keep alive for the life of the test
    pub path: String, // <tmpdir>/test.db
}

pub fn setup_db() -> (TestDb, SqliteConnection) {
    let dir = TempDir::new().expect("tempdir");
    let mut p = PathBuf::from(dir.path());
    p.push("test.db");
    let path = p.to_string_lossy().to_string();

    migrate::run_all(&path).expect("migrations");

    let conn = connection::connect_sqlite(&path).expect("connect");
    (TestDb { _dir: dir, path }, conn)
}

pub fn assert_sqlite_pragmas(conn: &mut SqliteConnection) {
    use diesel::sql_query;

    let jm: JournalMode = sql_query("PRAGMA journal_mode;").get_result(conn).unwrap();
    assert_eq!(jm.journal_mode.to_lowercase(), "wal"); // WAL is persistent per DB file

    let fk: ForeignKeys = sql_query("PRAGMA foreign_keys;").get_result(conn).unwrap();
    assert_eq!(fk.foreign_keys, 1);

    let bt: BusyTimeout = sql_query("PRAGMA busy_timeout;").get_result(conn).unwrap();
    assert_eq!(bt.busy_timeout, 5000);

    let sync: Synchronous = sql_query("PRAGMA synchronous;").get_result(conn).unwrap();
    assert_eq!(sync.synchronous, 2, "synchronous=FULL");
}

/// `2024-01-01T00:00Z + h hours`.
pub fn t(h: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(h)
}

pub fn price_nl() -> SeriesKey {
    SeriesKey::new(Domain::DayAheadPrice, "NL").unwrap()
}

pub fn generation_nl() -> SeriesKey {
    SeriesKey::new(Domain::Generation, "NL").unwrap()
}

pub fn prices(series: &SeriesKey, points: &[(i64, f64)]) -> Vec<Observation> {
    points
        .iter()
        .map(|(h, p)| Observation::price(series.clone(), t(*h), *p))
        .collect()
}

/// In-memory upstream double.
///
/// Serves whatever was published for the requested range. A script of
/// optional errors is consumed one step per call before serving; a gate can
/// hold every call until permits are added.
#[derive(Default)]
pub struct FakeUpstream {
    data: Mutex<HashMap<SeriesKey, Vec<Observation>>>,
    script: Mutex<VecDeque<Option<FetchError>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    calls: AtomicUsize,
}

impl FakeUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds or replaces points, keyed by series and timestamp.
    pub fn publish(&self, observations: Vec<Observation>) {
        let mut data = self.data.lock().unwrap();
        for obs in observations {
            let points = data.entry(obs.series.clone()).or_default();
            points.retain(|p| p.timestamp != obs.timestamp);
            points.push(obs);
        }
    }

    pub fn script(&self, steps: Vec<Option<FetchError>>) {
        self.script.lock().unwrap().extend(steps);
    }

    /// Holds every following call until permits are added to the returned gate.
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SeriesFetcher for FakeUpstream {
    async fn fetch_range(
        &self,
        series: &SeriesKey,
        range: SubRange,
    ) -> Result<Vec<Observation>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let step = self.script.lock().unwrap().pop_front().flatten();
        if let Some(err) = step {
            return Err(err);
        }

        let data = self.data.lock().unwrap();
        Ok(data
            .get(series)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.timestamp >= range.start && p.timestamp < range.end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Millisecond backoff so retry tests stay fast.
pub fn fast_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        request_timeout: Duration::from_secs(5),
        ..CoordinatorSettings::default()
    }
}

/// Migrated temp database, both stores and a fake upstream.
pub struct Harness {
    pub test_db: TestDb,
    pub db: Db,
    pub watermarks: Arc<SqliteWatermarkStore>,
    pub raw: Arc<SqliteRawStore>,
    pub upstream: Arc<FakeUpstream>,
}

pub fn harness() -> Harness {
    let (test_db, conn) = setup_db();
    let db = Db::from_connection(conn);
    Harness {
        watermarks: Arc::new(SqliteWatermarkStore::new(db.clone())),
        raw: Arc::new(SqliteRawStore::new(db.clone())),
        upstream: FakeUpstream::new(),
        test_db,
        db,
    }
}

impl Harness {
    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(
            self.upstream.clone(),
            self.watermarks.clone(),
            self.raw.clone(),
        )
        .with_settings(fast_settings())
        .with_run_locks(Arc::new(SqliteRunLockStore::new(self.db.clone())))
    }

    /// Coordinator over caller-supplied stores, sharing this harness' upstream
    /// and run locks.
    pub fn coordinator_with(
        &self,
        watermarks: Arc<dyn WatermarkStore>,
        raw: Arc<dyn RawStore>,
    ) -> Coordinator {
        Coordinator::new(self.upstream.clone(), watermarks, raw)
            .with_settings(fast_settings())
            .with_run_locks(Arc::new(SqliteRunLockStore::new(self.db.clone())))
    }
}

/// Raw store whose `fail_on`-th merge (1-based) fails; every other call goes
/// to the real store.
pub struct FailingRaw {
    inner: Arc<SqliteRawStore>,
    fail_on: usize,
    merges: AtomicUsize,
}

impl FailingRaw {
    pub fn new(inner: Arc<SqliteRawStore>, fail_on: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_on,
            merges: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RawStore for FailingRaw {
    async fn merge(
        &self,
        series: &SeriesKey,
        observations: Vec<Observation>,
    ) -> Result<MergeReport, StoreError> {
        let n = self.merges.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(StoreError::Corrupt("disk full".into()));
        }
        self.inner.merge(series, observations).await
    }

    fn read_range(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> BoxStream<'static, Result<Observation, StoreError>> {
        self.inner.read_range(series, from, to)
    }

    async fn timestamps(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        self.inner.timestamps(series, from, to).await
    }

    async fn corrections(&self, series: &SeriesKey) -> Result<Vec<Correction>, StoreError> {
        self.inner.corrections(series).await
    }

    async fn summary(&self, series: &SeriesKey) -> Result<SeriesSummary, StoreError> {
        self.inner.summary(series).await
    }

    async fn regions(&self, domain: Domain) -> Result<Vec<String>, StoreError> {
        self.inner.regions(domain).await
    }
}

/// Watermark store whose `advance` always fails with a storage error.
pub struct FailingWatermarks {
    inner: Arc<SqliteWatermarkStore>,
}

impl FailingWatermarks {
    pub fn new(inner: Arc<SqliteWatermarkStore>) -> Arc<Self> {
        Arc::new(Self { inner })
    }
}

#[async_trait]
impl WatermarkStore for FailingWatermarks {
    async fn get(&self, series: &SeriesKey) -> Result<Option<Watermark>, StoreError> {
        self.inner.get(series).await
    }

    async fn advance(
        &self,
        _series: &SeriesKey,
        _new_ts: DateTime<Utc>,
    ) -> Result<Watermark, WatermarkError> {
        Err(WatermarkError::Store(StoreError::Corrupt("watermark table locked".into())))
    }

    async fn list(&self) -> Result<Vec<Watermark>, StoreError> {
        self.inner.list().await
    }

    async fn reset(&self, series: &SeriesKey) -> Result<bool, StoreError> {
        self.inner.reset(series).await
    }
}
