use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use grid_ingestor::models::{domain::Domain, series::SeriesKey};
use tracing::{debug, info};

use crate::{
    db::Db,
    error::StoreError,
    models::{NewWatermark, WatermarkRow},
    schema::series_watermark::dsl as sw,
    tz,
    watermark::{RegressionError, Watermark, WatermarkError, WatermarkStore},
};

/// [`WatermarkStore`] backed by the `series_watermark` table.
#[derive(Clone)]
pub struct SqliteWatermarkStore {
    db: Db,
}

impl SqliteWatermarkStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

pub(crate) fn series_from_row(domain: &str, region: &str) -> Result<SeriesKey, StoreError> {
    let domain: Domain = domain
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{e}")))?;
    SeriesKey::new(domain, region).map_err(|e| StoreError::Corrupt(e.to_string()))
}

pub(crate) fn parse_stored_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    tz::parse_ts_to_utc(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn to_watermark(row: WatermarkRow) -> Result<Watermark, StoreError> {
    Ok(Watermark {
        series: series_from_row(&row.domain, &row.region)?,
        last_complete: parse_stored_ts(&row.last_complete_ts)?,
        updated_at: parse_stored_ts(&row.updated_at)?,
    })
}

fn load(conn: &mut SqliteConnection, series: &SeriesKey) -> Result<Option<WatermarkRow>, StoreError> {
    Ok(sw::series_watermark
        .filter(sw::domain.eq(series.domain.as_str()))
        .filter(sw::region.eq(&series.region))
        .select(WatermarkRow::as_select())
        .first(conn)
        .optional()?)
}

#[async_trait]
impl WatermarkStore for SqliteWatermarkStore {
    async fn get(&self, series: &SeriesKey) -> Result<Option<Watermark>, StoreError> {
        let series = series.clone();
        self.db
            .run(move |conn| load(conn, &series)?.map(to_watermark).transpose())
            .await
    }

    async fn advance(
        &self,
        series: &SeriesKey,
        new_ts: DateTime<Utc>,
    ) -> Result<Watermark, WatermarkError> {
        let series = series.clone();
        self.db
            .run_with(move |conn| {
                conn.immediate_transaction::<_, WatermarkError, _>(|conn| {
                    let current = load(conn, &series)?.map(to_watermark).transpose()?;
                    if let Some(current) = &current {
                        if new_ts < current.last_complete {
                            return Err(RegressionError {
                                series: series.clone(),
                                current: current.last_complete,
                                attempted: new_ts,
                            }
                            .into());
                        }
                        if new_ts == current.last_complete {
                            debug!(%series, watermark = %new_ts, "watermark unchanged");
                            return Ok(current.clone());
                        }
                    }

                    let now = Utc::now();
                    let ts_s = tz::to_rfc3339_millis(new_ts);
                    let now_s = tz::to_rfc3339_millis(now);
                    let row = NewWatermark {
                        domain: series.domain.as_str(),
                        region: &series.region,
                        last_complete_ts: &ts_s,
                        updated_at: &now_s,
                    };
                    diesel::insert_into(sw::series_watermark)
                        .values(&row)
                        .on_conflict((sw::domain, sw::region))
                        .do_update()
                        .set(&row)
                        .execute(conn)?;

                    info!(
                        %series,
                        from = ?current.as_ref().map(|c| c.last_complete),
                        to = %new_ts,
                        "watermark advanced"
                    );
                    Ok(Watermark {
                        series: series.clone(),
                        last_complete: new_ts,
                        updated_at: parse_stored_ts(&now_s)?,
                    })
                })
            })
            .await
    }

    async fn list(&self) -> Result<Vec<Watermark>, StoreError> {
        self.db
            .run(|conn| {
                sw::series_watermark
                    .order((sw::domain.asc(), sw::region.asc()))
                    .select(WatermarkRow::as_select())
                    .load(conn)?
                    .into_iter()
                    .map(to_watermark)
                    .collect()
            })
            .await
    }

    async fn reset(&self, series: &SeriesKey) -> Result<bool, StoreError> {
        let series = series.clone();
        self.db
            .run(move |conn| {
                let deleted = diesel::delete(
                    sw::series_watermark
                        .filter(sw::domain.eq(series.domain.as_str()))
                        .filter(sw::region.eq(&series.region)),
                )
                .execute(conn)?;
                if deleted > 0 {
                    info!(%series, "watermark reset");
                }
                Ok(deleted > 0)
            })
            .await
    }
}
