use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use grid_ingestor::models::series::SeriesKey;
use tracing::{debug, warn};

use crate::{
    db::Db,
    error::StoreError,
    models::{NewRunLock, RunLockRow},
    run_lock::{RunLease, RunLockStore},
    schema::series_run_lock::dsl as rl,
    tz,
    watermark::repo::{parse_stored_ts, series_from_row},
};

/// [`RunLockStore`] backed by the `series_run_lock` table.
#[derive(Clone)]
pub struct SqliteRunLockStore {
    db: Db,
}

impl SqliteRunLockStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RunLockStore for SqliteRunLockStore {
    async fn try_claim(
        &self,
        series: &SeriesKey,
        holder: &str,
        stale_after: Duration,
    ) -> Result<bool, StoreError> {
        let series = series.clone();
        let holder = holder.to_string();
        self.db
            .run(move |conn| {
                conn.immediate_transaction::<_, StoreError, _>(|conn| {
                    let now = Utc::now();
                    // Empty cutoff: no lease is ever old enough.
                    let cutoff = chrono::Duration::from_std(stale_after)
                        .ok()
                        .and_then(|d| now.checked_sub_signed(d))
                        .map_or_else(String::new, tz::to_rfc3339_millis);

                    let existing = rl::series_run_lock
                        .filter(rl::domain.eq(series.domain.as_str()))
                        .filter(rl::region.eq(&series.region))
                        .select(RunLockRow::as_select())
                        .first(conn)
                        .optional()?;

                    if let Some(row) = existing {
                        if row.holder != holder && row.acquired_at >= cutoff {
                            debug!(%series, held_by = %row.holder, "series leased elsewhere");
                            return Ok(false);
                        }
                        if row.holder != holder {
                            warn!(
                                %series,
                                stale_holder = %row.holder,
                                since = %row.acquired_at,
                                "taking over stale run lock"
                            );
                        }
                        diesel::delete(
                            rl::series_run_lock
                                .filter(rl::domain.eq(series.domain.as_str()))
                                .filter(rl::region.eq(&series.region)),
                        )
                        .execute(conn)?;
                    }

                    let now_s = tz::to_rfc3339_millis(now);
                    diesel::insert_into(rl::series_run_lock)
                        .values(NewRunLock {
                            domain: series.domain.as_str(),
                            region: &series.region,
                            holder: &holder,
                            acquired_at: &now_s,
                        })
                        .execute(conn)?;
                    Ok(true)
                })
            })
            .await
    }

    async fn renew(&self, series: &SeriesKey, holder: &str) -> Result<(), StoreError> {
        let series = series.clone();
        let holder = holder.to_string();
        self.db
            .run(move |conn| {
                let now_s = tz::to_rfc3339_millis(Utc::now());
                diesel::update(
                    rl::series_run_lock
                        .filter(rl::domain.eq(series.domain.as_str()))
                        .filter(rl::region.eq(&series.region))
                        .filter(rl::holder.eq(&holder)),
                )
                .set(rl::acquired_at.eq(&now_s))
                .execute(conn)?;
                Ok(())
            })
            .await
    }

    fn release(&self, series: &SeriesKey, holder: &str) -> Result<(), StoreError> {
        self.db.run_blocking(|conn| {
            diesel::delete(
                rl::series_run_lock
                    .filter(rl::domain.eq(series.domain.as_str()))
                    .filter(rl::region.eq(&series.region))
                    .filter(rl::holder.eq(holder)),
            )
            .execute(conn)?;
            Ok(())
        })
    }

    async fn list(&self) -> Result<Vec<RunLease>, StoreError> {
        self.db
            .run(|conn| {
                rl::series_run_lock
                    .order((rl::domain.asc(), rl::region.asc()))
                    .select(RunLockRow::as_select())
                    .load(conn)?
                    .into_iter()
                    .map(|row| {
                        Ok(RunLease {
                            series: series_from_row(&row.domain, &row.region)?,
                            holder: row.holder,
                            acquired_at: parse_stored_ts(&row.acquired_at)?,
                        })
                    })
                    .collect()
            })
            .await
    }
}
