mod common;
use common::{generation_nl, price_nl, setup_db};

use std::time::Duration;

use series_sync::{
    db::Db,
    run_lock::{RunLockStore, SqliteRunLockStore},
};

const HOUR: Duration = Duration::from_secs(3_600);

/// Two stores over separate connections to one database file, the way two
/// processes would see it.
fn two_stores() -> (common::TestDb, SqliteRunLockStore, SqliteRunLockStore) {
    let (test_db, conn) = setup_db();
    let a = SqliteRunLockStore::new(Db::from_connection(conn));
    let b = SqliteRunLockStore::new(Db::open(&test_db.path).unwrap());
    (test_db, a, b)
}

#[tokio::test]
async fn fresh_lease_blocks_other_holders() {
    let (_db, a, b) = two_stores();
    let key = price_nl();

    assert!(a.try_claim(&key, "a", HOUR).await.unwrap());
    assert!(!b.try_claim(&key, "b", HOUR).await.unwrap());
    assert!(
        b.try_claim(&generation_nl(), "b", HOUR).await.unwrap(),
        "other series are independent"
    );

    let leases = b.list().await.unwrap();
    assert_eq!(leases.len(), 2);
    assert_eq!(leases[0].series, price_nl());
    assert_eq!(leases[0].holder, "a");
    assert_eq!(leases[1].series, generation_nl());
    assert_eq!(leases[1].holder, "b");
}

#[tokio::test]
async fn holder_may_reclaim_its_own_lease() {
    let (_db, a, _b) = two_stores();
    let key = price_nl();
    assert!(a.try_claim(&key, "a", HOUR).await.unwrap());
    assert!(a.try_claim(&key, "a", HOUR).await.unwrap());
    assert_eq!(a.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn stale_lease_is_taken_over() {
    let (_db, a, b) = two_stores();
    let key = price_nl();
    assert!(a.try_claim(&key, "crashed", HOUR).await.unwrap());
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert!(b.try_claim(&key, "b", Duration::ZERO).await.unwrap());
    let leases = a.list().await.unwrap();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].holder, "b");

    // The old holder cannot release or renew what it lost.
    a.release(&key, "crashed").unwrap();
    a.renew(&key, "crashed").await.unwrap();
    let after = a.list().await.unwrap();
    assert_eq!(after, leases);
}

#[tokio::test]
async fn renew_moves_the_claim_time_forward() {
    let (_db, a, _b) = two_stores();
    let key = price_nl();
    assert!(a.try_claim(&key, "a", HOUR).await.unwrap());
    let claimed = a.list().await.unwrap()[0].acquired_at;
    tokio::time::sleep(Duration::from_millis(5)).await;

    a.renew(&key, "a").await.unwrap();
    assert!(a.list().await.unwrap()[0].acquired_at > claimed);
}

#[tokio::test]
async fn release_frees_the_series_for_others() {
    let (_db, a, b) = two_stores();
    let key = price_nl();
    assert!(a.try_claim(&key, "a", HOUR).await.unwrap());

    a.release(&key, "a").unwrap();
    assert!(a.list().await.unwrap().is_empty());
    assert!(b.try_claim(&key, "b", HOUR).await.unwrap());
}
