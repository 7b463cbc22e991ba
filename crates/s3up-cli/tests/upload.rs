//! Batch uploads against the in-memory store

use s3up_cli::{BatchUploader, CliError, FileOutcome, ShutdownSignal, Target, UploadSettings};
use s3up_client::{ChunkPolicy, ConfigError, MemoryStore, UploadError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn write(dir: &Path, relative: &str, data: &[u8]) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, data).unwrap();
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// Multipart kicks in at 10 bytes, with parts of at most 10 and at least 3
fn small_chunks() -> UploadSettings {
    UploadSettings {
        policy: ChunkPolicy::new(10, 3).unwrap(),
        ..UploadSettings::default()
    }
}

fn batch(store: &MemoryStore, settings: UploadSettings) -> BatchUploader {
    BatchUploader::new(Arc::new(store.clone()), settings, ShutdownSignal::new())
}

fn target(s: &str) -> Target {
    s.parse().unwrap()
}

fn fixture() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "notes.txt", b"hello");
    write(dir.path(), "page.html", b"<html></html>");
    write(dir.path(), "nested/deep.bin", b"deep");
    dir
}

#[tokio::test]
async fn test_uploads_top_level_files_with_headers() {
    let dir = fixture();
    let store = MemoryStore::new();

    let report = batch(&store, UploadSettings::default())
        .run(dir.path(), &target("bucket/site"))
        .await
        .unwrap();

    assert_eq!(report.uploaded(), 2);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(store.keys(), vec!["site/notes.txt", "site/page.html"]);

    let page = store.object("site/page.html").unwrap();
    assert_eq!(&page.data[..], b"<html></html>");
    assert_eq!(page.options.content_type.as_deref(), Some("text/html"));
    assert_eq!(page.options.acl.as_deref(), Some("private"));
    assert_eq!(store.calls().puts.len(), 2);
    assert!(store.calls().initiated.is_empty());
}

#[tokio::test]
async fn test_recursive_keys_keep_relative_paths() {
    let dir = fixture();
    let store = MemoryStore::new();
    let settings = UploadSettings {
        recursive: true,
        ..UploadSettings::default()
    };

    let report = batch(&store, settings)
        .run(dir.path(), &target("bucket"))
        .await
        .unwrap();

    assert_eq!(report.uploaded(), 3);
    assert_eq!(store.keys(), vec!["nested/deep.bin", "notes.txt", "page.html"]);
}

#[tokio::test]
async fn test_existing_keys_are_skipped_unless_overwriting() {
    let dir = fixture();
    let store = MemoryStore::new();
    store.insert_object("site/notes.txt", "old", chrono::Utc::now());

    let report = batch(&store, UploadSettings::default())
        .run(dir.path(), &target("bucket/site"))
        .await
        .unwrap();
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.uploaded(), 1);
    assert_eq!(&store.object("site/notes.txt").unwrap().data[..], b"old");

    let settings = UploadSettings {
        overwrite: true,
        ..UploadSettings::default()
    };
    let report = batch(&store, settings)
        .run(dir.path(), &target("bucket/site"))
        .await
        .unwrap();
    assert_eq!(report.uploaded(), 2);
    assert_eq!(&store.object("site/notes.txt").unwrap().data[..], b"hello");
}

#[tokio::test]
async fn test_single_file_source() {
    let dir = fixture();
    let store = MemoryStore::new();

    let report = batch(&store, UploadSettings::default())
        .run(&dir.path().join("notes.txt"), &target("bucket/docs/"))
        .await
        .unwrap();

    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].key, "docs/notes.txt");
    assert_eq!(store.keys(), vec!["docs/notes.txt"]);
}

#[tokio::test]
async fn test_large_file_goes_multipart() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(35);
    write(dir.path(), "big.bin", &data);
    write(dir.path(), "small.bin", b"tiny");
    let store = MemoryStore::new();

    let report = batch(&store, small_chunks())
        .run(dir.path(), &target("bucket/data"))
        .await
        .unwrap();

    assert_eq!(report.uploaded(), 2);
    match &report.files[0].outcome {
        FileOutcome::Uploaded { parts, size, .. } => {
            assert_eq!(*parts, 4);
            assert_eq!(*size, 35);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let calls = store.calls();
    assert_eq!(calls.initiated, vec!["data/big.bin".to_string()]);
    assert_eq!(calls.completed.len(), 1);
    assert_eq!(calls.completed[0].len(), 4);
    assert_eq!(calls.puts, vec!["data/small.bin".to_string()]);
    assert_eq!(&store.object("data/big.bin").unwrap().data[..], &data[..]);
}

#[tokio::test]
async fn test_file_over_the_part_limit_fails_before_any_request() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "big.bin", &pattern(35));
    let store = MemoryStore::new();
    let settings = UploadSettings {
        policy: ChunkPolicy::new(10, 3).unwrap().with_max_parts(3),
        ..UploadSettings::default()
    };

    let report = batch(&store, settings)
        .run(dir.path(), &target("bucket"))
        .await
        .unwrap();

    assert!(matches!(
        report.files[0].outcome,
        FileOutcome::Failed(CliError::Config(ConfigError::TooManyParts { parts: 4, max_parts: 3 }))
    ));
    assert!(store.calls().initiated.is_empty());
}

#[tokio::test]
async fn test_failed_parts_are_retried_on_the_same_session() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(35);
    write(dir.path(), "big.bin", &data);
    let store = MemoryStore::new();
    store.fail_part(2, 2);

    let report = batch(&store, small_chunks())
        .run(dir.path(), &target("bucket"))
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 0);
    let calls = store.calls();
    assert_eq!(calls.initiated.len(), 1);
    assert_eq!(calls.parts.len(), 6);
    assert!(calls.aborted.is_empty());
    assert_eq!(&store.object("big.bin").unwrap().data[..], &data[..]);
}

#[tokio::test]
async fn test_exhausted_retries_abort_and_batch_continues() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.bin", &pattern(35));
    write(dir.path(), "b.txt", b"fine");
    let store = MemoryStore::new();
    store.fail_part(3, 10);
    let settings = UploadSettings {
        part_retries: 1,
        ..small_chunks()
    };

    let report = batch(&store, settings)
        .run(dir.path(), &target("bucket"))
        .await
        .unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.uploaded(), 1);
    assert_eq!(report.exit_code(), 1);
    match &report.files[0].outcome {
        FileOutcome::Failed(CliError::Upload(UploadError::PartsFailed { failed, .. })) => {
            assert!(failed.contains(&3));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let calls = store.calls();
    assert_eq!(calls.aborted.len(), 1);
    assert!(calls.completed.is_empty());
    assert_eq!(store.open_sessions(), 0);
    assert_eq!(store.keys(), vec!["b.txt"]);
}

#[tokio::test]
async fn test_assembly_failure_retries_completion_only() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.bin", &pattern(35));
    let store = MemoryStore::new();
    store.fail_complete(1);

    let report = batch(&store, small_chunks())
        .run(dir.path(), &target("bucket"))
        .await
        .unwrap();

    assert_eq!(report.uploaded(), 1);
    let calls = store.calls();
    assert_eq!(calls.parts.len(), 4);
    assert_eq!(calls.completed.len(), 2);
}

#[tokio::test]
async fn test_part_and_completion_retries_are_counted_separately() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(35);
    write(dir.path(), "big.bin", &data);
    let store = MemoryStore::new();
    store.fail_part(2, 2);
    store.fail_complete(1);
    let settings = UploadSettings {
        part_retries: 2,
        ..small_chunks()
    };

    let report = batch(&store, settings)
        .run(dir.path(), &target("bucket"))
        .await
        .unwrap();

    assert_eq!(report.uploaded(), 1);
    let calls = store.calls();
    assert_eq!(calls.parts.len(), 6);
    assert_eq!(calls.completed.len(), 2);
    assert!(calls.aborted.is_empty());
    assert_eq!(&store.object("big.bin").unwrap().data[..], &data[..]);
}

#[tokio::test]
async fn test_failed_put_counts_toward_exit_code() {
    let dir = fixture();
    let store = MemoryStore::new();
    store.fail_put("notes.txt", 1);

    let report = batch(&store, UploadSettings::default())
        .run(dir.path(), &target("bucket"))
        .await
        .unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.uploaded(), 1);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_shutdown_stops_the_batch() {
    let dir = fixture();
    let store = MemoryStore::new();
    let shutdown = ShutdownSignal::new();
    shutdown.shutdown();

    let report = BatchUploader::new(Arc::new(store.clone()), UploadSettings::default(), shutdown)
        .run(dir.path(), &target("bucket"))
        .await
        .unwrap();

    assert_eq!(report.files.len(), 1);
    assert!(matches!(
        report.files[0].outcome,
        FileOutcome::Failed(CliError::Interrupted)
    ));
    assert!(store.keys().is_empty());
}

/// Trigger `shutdown` after `after`
fn shutdown_later(shutdown: &ShutdownSignal, after: Duration) {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        shutdown.shutdown();
    });
}

#[tokio::test]
async fn test_shutdown_interrupts_a_single_put() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "notes.txt", b"hello");
    let store = MemoryStore::new();
    store.delay_put(Duration::from_secs(30));
    let shutdown = ShutdownSignal::new();
    shutdown_later(&shutdown, Duration::from_millis(50));

    let uploader = BatchUploader::new(Arc::new(store.clone()), UploadSettings::default(), shutdown);
    let bucket = target("bucket");
    let run = uploader.run(dir.path(), &bucket);
    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown did not stop the PUT")
        .unwrap();

    assert_eq!(report.files.len(), 1);
    assert!(matches!(
        report.files[0].outcome,
        FileOutcome::Failed(CliError::Interrupted)
    ));
    assert_eq!(store.calls().puts.len(), 1);
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn test_shutdown_interrupts_a_completion_retry() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "big.bin", &pattern(35));
    let store = MemoryStore::new();
    store.fail_complete(1);
    store.delay_complete(Duration::from_secs(30));
    let shutdown = ShutdownSignal::new();
    shutdown_later(&shutdown, Duration::from_millis(100));

    let uploader = BatchUploader::new(Arc::new(store.clone()), small_chunks(), shutdown);
    let bucket = target("bucket");
    let run = uploader.run(dir.path(), &bucket);
    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown did not stop the completion retry")
        .unwrap();

    assert_eq!(report.files.len(), 1);
    assert!(matches!(
        report.files[0].outcome,
        FileOutcome::Failed(CliError::Upload(UploadError::Cancelled { .. }))
    ));
    let calls = store.calls();
    assert_eq!(calls.completed.len(), 2);
    assert_eq!(calls.aborted.len(), 1);
    assert_eq!(store.open_sessions(), 0);
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn test_missing_source_is_an_error() {
    let store = MemoryStore::new();
    let result = batch(&store, UploadSettings::default())
        .run(Path::new("/definitely/not/here"), &target("bucket"))
        .await;
    assert!(matches!(result, Err(CliError::Io(_))));
}
