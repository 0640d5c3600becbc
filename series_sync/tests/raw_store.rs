mod common;
use common::{generation_nl, price_nl, prices, setup_db, t};

use futures::TryStreamExt;
use grid_ingestor::models::{
    domain::Domain,
    observation::{Observation, Payload, fuel},
    series::SeriesKey,
};
use series_sync::{
    db::Db,
    error::StoreError,
    raw_store::{RawStore, SqliteRawStore},
};

fn store() -> (common::TestDb, SqliteRawStore) {
    let (test_db, conn) = setup_db();
    (test_db, SqliteRawStore::new(Db::from_connection(conn)))
}

#[tokio::test]
async fn first_merge_inserts_everything() {
    let (_db, store) = store();
    let key = price_nl();

    let report = store
        .merge(&key, prices(&key, &[(0, 10.0), (1, 11.0), (2, 12.0)]))
        .await
        .unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.written(), 3);
}

#[tokio::test]
async fn identical_merge_writes_nothing() {
    let (_db, store) = store();
    let key = price_nl();
    let batch = prices(&key, &[(0, 10.0), (1, 11.0)]);

    store.merge(&key, batch.clone()).await.unwrap();
    let again = store.merge(&key, batch).await.unwrap();
    assert_eq!(again.written(), 0);
    assert_eq!(again.unchanged, 2);
    assert!(store.corrections(&key).await.unwrap().is_empty());
}

#[tokio::test]
async fn changed_payload_is_recorded_as_correction() {
    let (_db, store) = store();
    let key = price_nl();
    store.merge(&key, prices(&key, &[(0, 10.0), (1, 11.0)])).await.unwrap();

    let report = store.merge(&key, prices(&key, &[(1, 99.5)])).await.unwrap();
    assert_eq!(report.corrected, 1);
    assert_eq!(report.inserted, 0);

    let corrections = store.corrections(&key).await.unwrap();
    assert_eq!(corrections.len(), 1);
    let c = &corrections[0];
    assert_eq!(c.timestamp, t(1));
    assert_eq!(c.revision, 2);
    assert_eq!(Payload::from_json(&c.previous_payload).unwrap(), Payload::DayAheadPrice { price: 11.0 });
    assert_eq!(Payload::from_json(&c.new_payload).unwrap(), Payload::DayAheadPrice { price: 99.5 });

    let stored: Vec<Observation> = store.read_range(&key, t(1), t(2)).try_collect().await.unwrap();
    assert_eq!(stored, prices(&key, &[(1, 99.5)]));
}

#[tokio::test]
async fn generation_mix_order_does_not_count_as_correction() {
    let (_db, store) = store();
    let key = generation_nl();
    let a = Observation::generation(key.clone(), t(0), [(fuel::WIND_ONSHORE, 120.0), (fuel::SOLAR, 3.5)]);
    let b = Observation::generation(key.clone(), t(0), [(fuel::SOLAR, 3.5), (fuel::WIND_ONSHORE, 120.0)]);

    store.merge(&key, vec![a]).await.unwrap();
    let report = store.merge(&key, vec![b]).await.unwrap();
    assert_eq!(report.unchanged, 1);
}

#[tokio::test]
async fn read_range_is_ascending_and_bounded_across_pages() {
    let (test_db, conn) = setup_db();
    let store = SqliteRawStore::new(Db::from_connection(conn)).with_page_size(2);
    let key = price_nl();
    // Merged out of order on purpose.
    store
        .merge(&key, prices(&key, &[(4, 4.0), (0, 0.0), (2, 2.0), (1, 1.0), (3, 3.0), (5, 5.0)]))
        .await
        .unwrap();

    let got: Vec<Observation> = store.read_range(&key, t(1), t(5)).try_collect().await.unwrap();
    let hours: Vec<_> = got.iter().map(|o| o.timestamp).collect();
    assert_eq!(hours, vec![t(1), t(2), t(3), t(4)]);

    let empty: Vec<Observation> = store.read_range(&key, t(10), t(20)).try_collect().await.unwrap();
    assert!(empty.is_empty());
    drop(test_db);
}

#[tokio::test]
async fn series_do_not_leak_into_each_other() {
    let (_db, store) = store();
    let nl = price_nl();
    let be = SeriesKey::new(Domain::DayAheadPrice, "BE").unwrap();
    store.merge(&nl, prices(&nl, &[(0, 1.0)])).await.unwrap();
    store.merge(&be, prices(&be, &[(0, 2.0), (1, 3.0)])).await.unwrap();

    let got: Vec<Observation> = store.read_range(&nl, t(0), t(10)).try_collect().await.unwrap();
    assert_eq!(got, prices(&nl, &[(0, 1.0)]));
    assert_eq!(store.timestamps(&be, t(0), t(10)).await.unwrap(), vec![t(0), t(1)]);
    assert_eq!(store.regions(Domain::DayAheadPrice).await.unwrap(), vec!["BE", "NL"]);
    assert!(store.regions(Domain::Generation).await.unwrap().is_empty());
}

#[tokio::test]
async fn summary_reports_count_and_bounds() {
    let (_db, store) = store();
    let key = price_nl();
    let empty = store.summary(&key).await.unwrap();
    assert_eq!(empty.rows, 0);
    assert!(empty.first.is_none() && empty.last.is_none());

    store.merge(&key, prices(&key, &[(3, 1.0), (1, 1.0), (7, 1.0)])).await.unwrap();
    let s = store.summary(&key).await.unwrap();
    assert_eq!(s.rows, 3);
    assert_eq!(s.first, Some(t(1)));
    assert_eq!(s.last, Some(t(7)));
}

#[tokio::test]
async fn foreign_series_in_batch_is_refused_whole() {
    let (_db, store) = store();
    let nl = price_nl();
    let be = SeriesKey::new(Domain::DayAheadPrice, "BE").unwrap();
    let mut batch = prices(&nl, &[(0, 1.0)]);
    batch.extend(prices(&be, &[(1, 1.0)]));

    let err = store.merge(&nl, batch).await.unwrap_err();
    assert!(matches!(err, StoreError::SeriesMismatch { .. }));
    assert_eq!(store.summary(&nl).await.unwrap().rows, 0);
}
