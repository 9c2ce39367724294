use super::*;
use crate::file_backend::FileBackend;
use crate::store::StoreContext;
use chute_protocol::batch_from_messages;
use tempfile::TempDir;

fn framed_store(dir: &TempDir, extra: &str) -> FramedFileStore {
    let mut store = FramedFileStore::new(StoreContext::default(), "web", false);
    let config: chute_config::StoreConfig = toml::from_str(&format!(
        r#"
        file_path = "{}"
        base_filename = "framed"
        rotate_period = "never"
        create_symlink = "no"
        {}
        "#,
        dir.path().display(),
        extra
    ))
    .unwrap();
    Store::configure(&mut store, &config);
    store
}

#[tokio::test]
async fn test_closed_store_rejects_batches() {
    let dir = TempDir::new().unwrap();
    let mut store = framed_store(&dir, "");

    let mut batch = batch_from_messages("web", ["x"]);
    assert!(!store.handle_messages(&mut batch).await);
    assert_eq!(batch.len(), 1);
}

#[tokio::test]
async fn test_writes_framed_records() {
    let dir = TempDir::new().unwrap();
    let mut store = framed_store(&dir, "");
    assert!(store.open().await);
    assert!(store.is_open());

    let mut batch = batch_from_messages("web", ["first", "second\nwith newline"]);
    assert!(store.handle_messages(&mut batch).await);
    assert!(batch.is_empty());
    store.close().await;

    let mut reader = FramedFile::new(dir.path().join("framed_00000"));
    reader.open_read().unwrap();
    assert_eq!(reader.read_next().unwrap(), Some(b"first".to_vec()));
    assert_eq!(
        reader.read_next().unwrap(),
        Some(b"second\nwith newline".to_vec())
    );
    assert_eq!(reader.read_next().unwrap(), None);
}

#[tokio::test]
async fn test_simple_file_writes_raw_bytes() {
    let dir = TempDir::new().unwrap();
    let mut store = framed_store(&dir, r#"use_simple_file = "yes""#);
    assert!(store.open().await);

    let mut batch = batch_from_messages("web", ["raw bytes"]);
    assert!(store.handle_messages(&mut batch).await);
    store.close().await;

    let contents = std::fs::read(dir.path().join("framed_00000")).unwrap();
    assert_eq!(contents, b"raw bytes");
}

#[tokio::test]
async fn test_rotates_immediately_when_over_max_size() {
    let dir = TempDir::new().unwrap();
    let mut store = framed_store(&dir, "max_size = 64");
    assert!(store.open().await);

    let mut batch = batch_from_messages("web", vec![vec![b'x'; 100]]);
    assert!(store.handle_messages(&mut batch).await);
    store.close().await;

    // The oversized write landed in the first file; the rotation opened the
    // next suffix without waiting for a periodic check.
    assert!(dir.path().join("framed_00000").exists());
    assert!(dir.path().join("framed_00001").exists());
    let stats = std::fs::read_to_string(dir.path().join("scribe_stats")).unwrap();
    assert!(stats.contains("framed_00000"));
}

#[tokio::test]
async fn test_periodic_check_rotates_by_interval() {
    let dir = TempDir::new().unwrap();
    let mut store = FramedFileStore::new(StoreContext::default(), "web", false);
    let config: chute_config::StoreConfig = toml::from_str(&format!(
        r#"
        file_path = "{}"
        base_filename = "framed"
        rotate_period = "1h"
        create_symlink = "no"
        "#,
        dir.path().display()
    ))
    .unwrap();
    Store::configure(&mut store, &config);
    assert!(store.open().await);

    let mut batch = batch_from_messages("web", ["x"]);
    assert!(store.handle_messages(&mut batch).await);

    // Not due yet.
    store.periodic_check().await;
    let early: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    assert!(early.iter().all(|n| !n.contains("_00001")));

    // Pretend the file was opened two hours ago.
    store.base.last_roll -= 7200;
    store.periodic_check().await;
    store.close().await;

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    assert_eq!(
        names.iter().filter(|n| n.contains("_00001")).count(),
        1,
        "interval roll should have opened the next suffix: {:?}",
        names
    );
}

#[tokio::test]
async fn test_copy_carries_tuning() {
    let dir = TempDir::new().unwrap();
    let store = framed_store(
        &dir,
        "flush_frequency_ms = 250\nmsg_buffer_size = 4096",
    );
    assert_eq!(store.flush_frequency_ms, 250);
    assert_eq!(store.msg_buffer_size, 4096);

    let copied = Store::copy(&store, "app");
    assert_eq!(copied.category(), "app");
    assert_eq!(copied.store_type(), "framedfile");
    assert!(!copied.is_open());
}
