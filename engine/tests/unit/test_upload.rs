//! Artifact uploader unit tests

#[path = "../common/mod.rs"]
mod common;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use boop_engine::deploy::upload::{list_output_files, upload_files, UPLOAD_CONCURRENCY};
use boop_engine::errors::EngineError;

use common::MemoryObjectStore;

async fn write_tree(root: &Path, count: usize) {
    tokio::fs::create_dir_all(root.join("assets")).await.unwrap();
    tokio::fs::write(root.join("index.html"), "<h1>home</h1>").await.unwrap();
    for i in 0..count {
        tokio::fs::write(root.join("assets").join(format!("chunk-{}.js", i)), format!("//{}", i))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_upload_respects_concurrency_limit() {
    let tmp = tempfile::tempdir().unwrap();
    write_tree(tmp.path(), 99).await;
    let files = list_output_files(tmp.path()).await.unwrap();
    assert_eq!(files.len(), 100);

    let store = MemoryObjectStore::with_delay(Duration::from_millis(10));
    let uploaded = upload_files(
        &store,
        files,
        "sites/s1/d1",
        UPLOAD_CONCURRENCY,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(uploaded, 100);
    let max = store.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= UPLOAD_CONCURRENCY, "saw {} concurrent uploads", max);
    assert!(max > 1);

    let names = store.names();
    assert_eq!(names.len(), 100);
    assert!(names.contains(&"sites/s1/d1/index.html".to_string()));
    assert!(names.contains(&"sites/s1/d1/assets/chunk-42.js".to_string()));
    assert_eq!(store.content_type("sites/s1/d1/index.html").as_deref(), Some("text/html"));
    assert_eq!(
        store.content_type("sites/s1/d1/assets/chunk-0.js").as_deref(),
        Some("application/javascript")
    );
}

#[tokio::test]
async fn test_first_error_names_the_file_and_stops_dispatch() {
    let tmp = tempfile::tempdir().unwrap();
    write_tree(tmp.path(), 200).await;
    let files = list_output_files(tmp.path()).await.unwrap();
    let total = files.len();

    let store = MemoryObjectStore::failing_on(".js");
    let err = upload_files(&store, files, "sites/s1/d1", 4, &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        EngineError::Upload { action, path, .. } => {
            assert_eq!(*action, "upload");
            assert!(path.starts_with("assets/chunk-"), "unexpected path {}", path);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("assets/chunk-"));

    // in-flight uploads finish, nothing new is dispatched
    let calls = store.upload_calls.load(Ordering::SeqCst);
    assert!(calls <= 8 && calls < total, "{} uploads issued", calls);
}

#[tokio::test]
async fn test_canceled_before_start_uploads_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    write_tree(tmp.path(), 5).await;
    let files = list_output_files(tmp.path()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let store = MemoryObjectStore::new();
    let err = upload_files(&store, files, "sites/s1/d1", 20, &cancel).await.unwrap_err();

    assert!(err.is_canceled());
    assert!(store.names().is_empty());
}

#[tokio::test]
async fn test_empty_output_uploads_nothing() {
    let store = MemoryObjectStore::new();
    let uploaded = upload_files(&store, Vec::new(), "sites/s1/d1", 20, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(uploaded, 0);
}
