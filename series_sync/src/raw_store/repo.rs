use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{
    dsl::{count_star, max, min},
    prelude::*,
};
use futures::stream::{self, BoxStream, StreamExt};
use grid_ingestor::models::{
    domain::Domain,
    observation::{Observation, Payload},
    series::SeriesKey,
};
use tracing::{debug, info};

use crate::{
    db::Db,
    error::StoreError,
    models::{CorrectionRow, NewCorrection, NewObservation, ObservationRow},
    raw_store::{Correction, MergeReport, RawStore, SeriesSummary},
    schema::{observation::dsl as o, observation_correction::dsl as c},
    tz,
    watermark::repo::{parse_stored_ts, series_from_row},
};

/// Rows fetched per round trip by [`RawStore::read_range`].
pub const DEFAULT_PAGE_SIZE: i64 = 1_000;

/// [`RawStore`] backed by the `observation` and `observation_correction` tables.
#[derive(Clone)]
pub struct SqliteRawStore {
    db: Db,
    page_size: i64,
}

impl SqliteRawStore {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

enum Cursor {
    /// Continue with rows strictly after this stored timestamp.
    After(String),
    Done,
}

fn to_observation(series: &SeriesKey, row: ObservationRow) -> Result<Observation, StoreError> {
    Ok(Observation {
        series: series.clone(),
        timestamp: parse_stored_ts(&row.ts)?,
        payload: Payload::from_json(&row.payload)?,
    })
}

fn load_page(
    conn: &mut SqliteConnection,
    series: &SeriesKey,
    from: &str,
    to: &str,
    after: &str,
    limit: i64,
) -> Result<Vec<ObservationRow>, StoreError> {
    Ok(o::observation
        .filter(o::domain.eq(series.domain.as_str()))
        .filter(o::region.eq(&series.region))
        .filter(o::ts.ge(from))
        .filter(o::ts.gt(after))
        .filter(o::ts.lt(to))
        .order(o::ts.asc())
        .limit(limit)
        .select(ObservationRow::as_select())
        .load(conn)?)
}

#[async_trait]
impl RawStore for SqliteRawStore {
    async fn merge(
        &self,
        series: &SeriesKey,
        observations: Vec<Observation>,
    ) -> Result<MergeReport, StoreError> {
        if observations.is_empty() {
            return Ok(MergeReport::default());
        }
        if let Some(stray) = observations.iter().find(|obs| &obs.series != series) {
            return Err(StoreError::SeriesMismatch {
                expected: series.to_string(),
                got: stray.series.to_string(),
            });
        }

        let encoded = observations
            .iter()
            .map(|obs| {
                Ok((
                    tz::to_rfc3339_millis(obs.timestamp),
                    obs.payload.to_canonical_json()?,
                ))
            })
            .collect::<Result<Vec<(String, String)>, StoreError>>()?;

        let key = series.clone();
        let report = self
            .db
            .run(move |conn| {
                conn.immediate_transaction::<_, StoreError, _>(|conn| {
                    let domain = key.domain.as_str();
                    let now = tz::to_rfc3339_millis(Utc::now());
                    let mut report = MergeReport::default();

                    for (ts, payload) in &encoded {
                        let existing: Option<(String, i32)> = o::observation
                            .filter(o::domain.eq(domain))
                            .filter(o::region.eq(&key.region))
                            .filter(o::ts.eq(ts))
                            .select((o::payload, o::revision))
                            .first(conn)
                            .optional()?;

                        match existing {
                            None => {
                                diesel::insert_into(o::observation)
                                    .values(&NewObservation {
                                        domain,
                                        region: &key.region,
                                        ts,
                                        payload,
                                        revision: 1,
                                        first_written_at: &now,
                                        updated_at: &now,
                                    })
                                    .execute(conn)?;
                                report.inserted += 1;
                            }
                            Some((previous, _)) if &previous == payload => report.unchanged += 1,
                            Some((previous, revision)) => {
                                let next = revision + 1;
                                diesel::update(
                                    o::observation
                                        .filter(o::domain.eq(domain))
                                        .filter(o::region.eq(&key.region))
                                        .filter(o::ts.eq(ts)),
                                )
                                .set((
                                    o::payload.eq(payload),
                                    o::revision.eq(next),
                                    o::updated_at.eq(&now),
                                ))
                                .execute(conn)?;

                                diesel::insert_into(c::observation_correction)
                                    .values(&NewCorrection {
                                        domain,
                                        region: &key.region,
                                        ts,
                                        previous_payload: &previous,
                                        new_payload: payload,
                                        revision: next,
                                        corrected_at: &now,
                                    })
                                    .execute(conn)?;
                                info!(series = %key, %ts, revision = next, "observation corrected");
                                report.corrected += 1;
                            }
                        }
                    }
                    Ok(report)
                })
            })
            .await?;

        debug!(
            %series,
            inserted = report.inserted,
            corrected = report.corrected,
            unchanged = report.unchanged,
            "merged batch"
        );
        Ok(report)
    }

    fn read_range(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> BoxStream<'static, Result<Observation, StoreError>> {
        let db = self.db.clone();
        let page_size = self.page_size;
        let series = series.clone();
        let from = tz::to_rfc3339_millis(from);
        let to = tz::to_rfc3339_millis(to);

        stream::unfold(Cursor::After(String::new()), move |cursor| {
            let db = db.clone();
            let series = series.clone();
            let (from, to) = (from.clone(), to.clone());
            async move {
                let Cursor::After(after) = cursor else {
                    return None;
                };
                let page_series = series.clone();
                let page = db
                    .run(move |conn| load_page(conn, &page_series, &from, &to, &after, page_size))
                    .await;

                match page {
                    Err(e) => Some((vec![Err(e)], Cursor::Done)),
                    Ok(rows) if rows.is_empty() => None,
                    Ok(rows) => {
                        let next = match rows.last() {
                            Some(last) if rows.len() as i64 >= page_size => {
                                Cursor::After(last.ts.clone())
                            }
                            _ => Cursor::Done,
                        };
                        let items = rows
                            .into_iter()
                            .map(|row| to_observation(&series, row))
                            .collect::<Vec<_>>();
                        Some((items, next))
                    }
                }
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn timestamps(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let series = series.clone();
        let from = tz::to_rfc3339_millis(from);
        let to = tz::to_rfc3339_millis(to);
        self.db
            .run(move |conn| {
                o::observation
                    .filter(o::domain.eq(series.domain.as_str()))
                    .filter(o::region.eq(&series.region))
                    .filter(o::ts.ge(&from))
                    .filter(o::ts.lt(&to))
                    .order(o::ts.asc())
                    .select(o::ts)
                    .load::<String>(conn)?
                    .iter()
                    .map(|ts| parse_stored_ts(ts))
                    .collect()
            })
            .await
    }

    async fn corrections(&self, series: &SeriesKey) -> Result<Vec<Correction>, StoreError> {
        let series = series.clone();
        self.db
            .run(move |conn| {
                c::observation_correction
                    .filter(c::domain.eq(series.domain.as_str()))
                    .filter(c::region.eq(&series.region))
                    .order(c::id.asc())
                    .select(CorrectionRow::as_select())
                    .load(conn)?
                    .into_iter()
                    .map(|row| {
                        Ok(Correction {
                            series: series_from_row(&row.domain, &row.region)?,
                            timestamp: parse_stored_ts(&row.ts)?,
                            previous_payload: row.previous_payload,
                            new_payload: row.new_payload,
                            revision: row.revision,
                            corrected_at: parse_stored_ts(&row.corrected_at)?,
                        })
                    })
                    .collect()
            })
            .await
    }

    async fn summary(&self, series: &SeriesKey) -> Result<SeriesSummary, StoreError> {
        let series = series.clone();
        self.db
            .run(move |conn| {
                let (rows, first, last): (i64, Option<String>, Option<String>) = o::observation
                    .filter(o::domain.eq(series.domain.as_str()))
                    .filter(o::region.eq(&series.region))
                    .select((count_star(), min(o::ts), max(o::ts)))
                    .first(conn)?;
                Ok(SeriesSummary {
                    rows,
                    first: first.as_deref().map(parse_stored_ts).transpose()?,
                    last: last.as_deref().map(parse_stored_ts).transpose()?,
                })
            })
            .await
    }

    async fn regions(&self, domain: Domain) -> Result<Vec<String>, StoreError> {
        self.db
            .run(move |conn| {
                Ok(o::observation
                    .filter(o::domain.eq(domain.as_str()))
                    .select(o::region)
                    .distinct()
                    .order(o::region.asc())
                    .load::<String>(conn)?)
            })
            .await
    }
}
