//! Prefix expiry against the in-memory store

use chrono::{Duration, Utc};
use s3up_cli::{cutoff, tmpwatch};
use s3up_client::MemoryStore;

fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    let now = Utc::now();
    store.insert_object("logs/old-1", "x", now - Duration::days(30));
    store.insert_object("logs/old-2", "x", now - Duration::days(8));
    store.insert_object("logs/fresh", "x", now - Duration::days(1));
    store.insert_object("keep/old", "x", now - Duration::days(90));
    store
}

#[tokio::test]
async fn test_deletes_only_old_objects_under_prefix() {
    let store = seeded();

    let report = tmpwatch(&store, Some("logs/"), cutoff(Utc::now(), 7), false)
        .await
        .unwrap();

    assert_eq!(report.expired, vec!["logs/old-1", "logs/old-2"]);
    assert_eq!(report.kept, 1);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(store.keys(), vec!["keep/old", "logs/fresh"]);
}

#[tokio::test]
async fn test_whole_bucket_without_prefix() {
    let store = seeded();

    let report = tmpwatch(&store, None, cutoff(Utc::now(), 7), false)
        .await
        .unwrap();

    assert_eq!(report.expired.len(), 3);
    assert_eq!(store.keys(), vec!["logs/fresh"]);
}

#[tokio::test]
async fn test_dry_run_deletes_nothing() {
    let store = seeded();

    let report = tmpwatch(&store, Some("logs/"), cutoff(Utc::now(), 7), true)
        .await
        .unwrap();

    assert_eq!(report.expired.len(), 2);
    assert!(store.calls().deletes.is_empty());
    assert_eq!(store.keys().len(), 4);
}

#[tokio::test]
async fn test_failed_delete_is_counted_and_pass_continues() {
    let store = seeded();
    store.fail_delete("logs/old-1", 1);

    let report = tmpwatch(&store, Some("logs/"), cutoff(Utc::now(), 7), false)
        .await
        .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "logs/old-1");
    assert_eq!(report.expired, vec!["logs/old-2"]);
    assert_eq!(report.exit_code(), 1);
    assert!(store.object("logs/old-1").is_some());
}

#[tokio::test]
async fn test_follows_continuation_tokens() {
    let store = MemoryStore::new();
    let old = Utc::now() - Duration::days(10);
    for i in 0..2500 {
        store.insert_object(format!("tmp/{:05}", i), "x", old);
    }

    let report = tmpwatch(&store, Some("tmp/"), cutoff(Utc::now(), 1), false)
        .await
        .unwrap();

    assert_eq!(report.expired.len(), 2500);
    assert!(store.keys().is_empty());
}
