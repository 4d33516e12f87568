use leaselock::{
    time::ManualClock, LeaseLock, LeaseStore, LockConfig, LockRow, RowFilter, SqliteStore,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn open_pair(dir: &TempDir) -> (SqliteStore, SqliteStore) {
    let path = dir.path().join("locks.db");
    let first = SqliteStore::open(&path).await.unwrap();
    let second = SqliteStore::open(&path).await.unwrap();
    (first, second)
}

#[tokio::test]
async fn test_two_handles_share_one_table() {
    let dir = TempDir::new().unwrap();
    let (first, second) = open_pair(&dir).await;

    first.insert(LockRow::new("nightly", 1_000)).await.unwrap();
    let err = second.insert(LockRow::new("nightly", 2_000)).await.unwrap_err();
    assert!(err.is_duplicate());

    assert_eq!(second.rows().await.unwrap(), vec![LockRow::new("nightly", 1_000)]);
    assert_eq!(second.delete_where(RowFilter::ExpiredAt(1_000)).await.unwrap(), 1);
    assert!(first.rows().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lock_managers_over_sqlite() {
    let dir = TempDir::new().unwrap();
    let (first, second) = open_pair(&dir).await;
    let clock = Arc::new(ManualClock::new(10_000));
    let p1 = LeaseLock::with_clock(Arc::new(first), LockConfig::default(), clock.clone());
    let p2 = LeaseLock::with_clock(Arc::new(second.clone()), LockConfig::default(), clock.clone());

    assert!(p1.try_acquire("report", Duration::from_millis(50)).await);
    assert!(!p2.try_acquire("report", Duration::from_millis(50)).await);

    clock.advance(Duration::from_millis(50));
    assert!(p2.try_acquire("report", Duration::from_millis(50)).await);
    assert_eq!(second.rows().await.unwrap()[0].expiry, 10_100);

    p2.release("report").await;
    assert!(second.rows().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_flushes_sqlite_rows() {
    let dir = TempDir::new().unwrap();
    let (first, second) = open_pair(&dir).await;
    let lock = LeaseLock::new(Arc::new(first), LockConfig::default());

    for id in ["a", "b"] {
        assert!(lock.acquire(id, Duration::from_secs(1)).await);
    }
    assert_eq!(second.rows().await.unwrap().len(), 2);

    assert_eq!(lock.shutdown().await, 2);
    assert!(second.rows().await.unwrap().is_empty());
}
