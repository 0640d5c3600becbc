//! Per-series mutual exclusion.
//!
//! Runs of one coordinator are excluded through an in-memory set. With a
//! [`RunLockStore`] attached, the series is also leased in the database so
//! other coordinators and processes see it as taken.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use grid_ingestor::models::series::SeriesKey;
use tracing::warn;

use crate::{error::StoreError, run_lock::RunLockStore};

static NEXT_HOLDER: AtomicU64 = AtomicU64::new(0);

/// Process-unique lease holder name.
fn holder_id() -> String {
    format!(
        "pid{}-{}-{}",
        std::process::id(),
        Utc::now().timestamp_millis(),
        NEXT_HOLDER.fetch_add(1, Ordering::Relaxed)
    )
}

#[derive(Clone)]
struct Shared {
    store: Arc<dyn RunLockStore>,
    holder: String,
}

/// Set of series with a run in flight.
#[derive(Default, Clone)]
pub struct SeriesLocks {
    held: Arc<Mutex<HashSet<SeriesKey>>>,
    shared: Option<Shared>,
}

/// Releases its series when dropped, including when the run future is
/// cancelled mid-flight.
pub struct SeriesGuard {
    held: Arc<Mutex<HashSet<SeriesKey>>>,
    shared: Option<Shared>,
    series: SeriesKey,
}

fn lock(held: &Mutex<HashSet<SeriesKey>>) -> MutexGuard<'_, HashSet<SeriesKey>> {
    // The set stays consistent even if a holder panicked.
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SeriesLocks {
    /// Locks that also lease every series through `store`.
    pub fn shared(store: Arc<dyn RunLockStore>) -> Self {
        Self {
            held: Arc::default(),
            shared: Some(Shared {
                store,
                holder: holder_id(),
            }),
        }
    }

    /// Name this coordinator's leases are stored under.
    pub fn holder(&self) -> Option<&str> {
        self.shared.as_ref().map(|s| s.holder.as_str())
    }

    /// `None` when `series` is already running here or, with a lease store,
    /// under a lease younger than `stale_after` anywhere else.
    pub async fn try_acquire(
        &self,
        series: &SeriesKey,
        stale_after: Duration,
    ) -> Result<Option<SeriesGuard>, StoreError> {
        if !lock(&self.held).insert(series.clone()) {
            return Ok(None);
        }
        // Built first so an early return below releases the local claim.
        let local = SeriesGuard {
            held: Arc::clone(&self.held),
            shared: None,
            series: series.clone(),
        };

        let Some(shared) = &self.shared else {
            return Ok(Some(local));
        };
        if !shared
            .store
            .try_claim(series, &shared.holder, stale_after)
            .await?
        {
            return Ok(None);
        }
        let mut guard = local;
        guard.shared = Some(shared.clone());
        Ok(Some(guard))
    }

    /// Whether this coordinator has a run of `series` in flight.
    pub fn is_running(&self, series: &SeriesKey) -> bool {
        lock(&self.held).contains(series)
    }
}

impl SeriesGuard {
    /// Keeps the lease from going stale while a long run makes progress.
    pub async fn renew(&self) {
        if let Some(shared) = &self.shared {
            if let Err(error) = shared.store.renew(&self.series, &shared.holder).await {
                warn!(series = %self.series, %error, "failed to renew run lock");
            }
        }
    }
}

impl Drop for SeriesGuard {
    fn drop(&mut self) {
        if let Some(shared) = &self.shared {
            if let Err(error) = shared.store.release(&self.series, &shared.holder) {
                warn!(series = %self.series, %error, "failed to release run lock");
            }
        }
        lock(&self.held).remove(&self.series);
    }
}
