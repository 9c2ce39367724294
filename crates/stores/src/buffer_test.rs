use super::*;
use crate::store::StoreContext;
use chute_protocol::batch_from_messages;
use std::time::Duration;
use tempfile::TempDir;

/// Buffer store whose primary writes under `primary_path` and whose
/// secondary spools under `spool_path`. Retry interval zero so periodic
/// checks reconnect as soon as a second has passed.
fn buffer_store(ctx: &StoreContext, primary_path: &str, spool_path: &str) -> BufferStore {
    let mut store = BufferStore::new(ctx.clone(), "web", false);
    let config: chute_config::StoreConfig = toml::from_str(&format!(
        r#"
        type = "buffer"
        retry_interval = 0
        retry_interval_range = 0

        [primary]
        type = "file"
        file_path = "{}"
        base_filename = "primary"
        create_symlink = "no"
        add_newlines = "yes"

        [secondary]
        type = "file"
        file_path = "{}"
        "#,
        primary_path, spool_path
    ))
    .unwrap();
    Store::configure(&mut store, &config);
    store
}

fn spooled_messages(spool_dir: &TempDir) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut names: Vec<_> = std::fs::read_dir(spool_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    names.sort();
    for path in names {
        let mut reader = crate::file_backend::FramedFile::new(&path);
        use crate::file_backend::FileBackend;
        reader.open_read().unwrap();
        while let Ok(Some(record)) = reader.read_next() {
            out.push(record);
        }
    }
    out
}

#[tokio::test]
async fn test_open_failure_disconnects_and_spools() {
    let primary_dir = TempDir::new().unwrap();
    let spool_dir = TempDir::new().unwrap();
    // A file where the primary wants a directory keeps it from opening.
    let blocker = primary_dir.path().join("blocker");
    std::fs::write(&blocker, "in the way").unwrap();

    let ctx = StoreContext::default();
    let mut store = buffer_store(
        &ctx,
        &format!("{}/sub", blocker.display()),
        &spool_dir.path().display().to_string(),
    );

    assert!(store.open().await, "secondary keeps the store open");
    assert_eq!(store.state(), BufferState::Disconnected);

    let mut batch = batch_from_messages("web", ["one", "two", "three"]);
    assert!(store.handle_messages(&mut batch).await);

    let spooled = spooled_messages(&spool_dir);
    assert_eq!(spooled, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
}

#[tokio::test]
async fn test_drains_spool_in_order_after_primary_recovers() {
    let primary_dir = TempDir::new().unwrap();
    let spool_dir = TempDir::new().unwrap();
    let blocker = primary_dir.path().join("blocker");
    std::fs::write(&blocker, "in the way").unwrap();
    let primary_path = format!("{}/data", blocker.display());

    let ctx = StoreContext::default();
    let mut store = buffer_store(&ctx, &primary_path, &spool_dir.path().display().to_string());

    assert!(store.open().await);
    assert_eq!(store.state(), BufferState::Disconnected);

    let messages: Vec<String> = (0..100).map(|i| format!("msg-{:04}", i)).collect();
    let mut batch = batch_from_messages("web", messages.clone());
    assert!(store.handle_messages(&mut batch).await);
    assert_eq!(spooled_messages(&spool_dir).len(), 100);

    // "Bring the primary up": clear the obstruction, wait out the retry
    // interval, then let the periodic check reconnect and drain.
    std::fs::remove_file(&blocker).unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    store.periodic_check().await;

    assert_eq!(store.state(), BufferState::Streaming);
    store.close().await;

    let primary_file = std::path::PathBuf::from(&primary_path).join("primary_00000");
    let mut reader = crate::file_backend::PlainFile::new(&primary_file);
    use crate::file_backend::FileBackend;
    reader.open_read().unwrap();
    let mut delivered = Vec::new();
    while let Ok(Some(record)) = reader.read_next() {
        delivered.push(String::from_utf8(record).unwrap());
    }
    // Every spooled message reached the primary exactly once, in order.
    assert_eq!(delivered, messages);

    // The spool is gone.
    assert_eq!(spooled_messages(&spool_dir).len(), 0);
}

#[tokio::test]
async fn test_streaming_when_primary_healthy() {
    let primary_dir = TempDir::new().unwrap();
    let spool_dir = TempDir::new().unwrap();

    let ctx = StoreContext::default();
    let mut store = buffer_store(
        &ctx,
        &primary_dir.path().display().to_string(),
        &spool_dir.path().display().to_string(),
    );

    assert!(store.open().await);
    // With replay on, a fresh open drains whatever a previous instance left
    // behind before streaming begins.
    assert_eq!(store.state(), BufferState::SendingBuffer);
    store.periodic_check().await;
    assert_eq!(store.state(), BufferState::Streaming);

    let mut batch = batch_from_messages("web", ["direct"]);
    assert!(store.handle_messages(&mut batch).await);
    store.close().await;

    // Nothing was spooled.
    assert_eq!(spooled_messages(&spool_dir).len(), 0);
    let contents = std::fs::read_to_string(primary_dir.path().join("primary_00000")).unwrap();
    assert_eq!(contents, "direct\n");
}

#[tokio::test]
async fn test_oversized_batch_sheds_to_secondary() {
    let primary_dir = TempDir::new().unwrap();
    let spool_dir = TempDir::new().unwrap();

    let ctx = StoreContext::default();
    let mut store = BufferStore::new(ctx.clone(), "web", false);
    let config: chute_config::StoreConfig = toml::from_str(&format!(
        r#"
        max_queue_length = 2
        retry_interval = 300

        [primary]
        type = "file"
        file_path = "{}"
        base_filename = "primary"

        [secondary]
        type = "file"
        file_path = "{}"
        "#,
        primary_dir.path().display(),
        spool_dir.path().display()
    ))
    .unwrap();
    Store::configure(&mut store, &config);

    assert!(store.open().await);
    store.periodic_check().await;
    assert_eq!(store.state(), BufferState::Streaming);

    let mut batch = batch_from_messages("web", ["a", "b", "c", "d", "e"]);
    assert!(store.handle_messages(&mut batch).await);

    // The queue cap tripped before the primary saw anything.
    assert_eq!(store.state(), BufferState::Disconnected);
    assert_eq!(spooled_messages(&spool_dir).len(), 5);
    assert_eq!(ctx.counters.get("web", "retries"), 1);
    let primary_bytes = std::fs::metadata(primary_dir.path().join("primary_00000"))
        .map(|m| m.len())
        .unwrap_or(0);
    assert_eq!(primary_bytes, 0);
}

#[tokio::test]
async fn test_network_primary_recovers_and_drains() {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    // Reserve a port, then leave it closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let spool_dir = TempDir::new().unwrap();
    let ctx = StoreContext::default();
    let mut store = BufferStore::new(ctx.clone(), "web", false);
    let config: chute_config::StoreConfig = toml::from_str(&format!(
        r#"
        retry_interval = 0
        retry_interval_range = 0

        [primary]
        type = "network"
        remote_host = "127.0.0.1"
        remote_port = {}
        timeout = 1000

        [secondary]
        type = "file"
        file_path = "{}"
        "#,
        port,
        spool_dir.path().display()
    ))
    .unwrap();
    Store::configure(&mut store, &config);

    assert!(store.open().await);
    assert_eq!(store.state(), BufferState::Disconnected);

    let messages: Vec<String> = (0..1000).map(|i| format!("msg-{:04}", i)).collect();
    let mut batch = batch_from_messages("web", messages.clone());
    assert!(store.handle_messages(&mut batch).await);
    assert_eq!(spooled_messages(&spool_dir).len(), 1000);

    // The upstream comes back; after the retry interval the next periodic
    // check reconnects and drains the spool through it in order.
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        loop {
            let mut count_buf = [0u8; 4];
            if socket.read_exact(&mut count_buf).await.is_err() {
                break;
            }
            for _ in 0..u32::from_le_bytes(count_buf) {
                let mut len_buf = [0u8; 4];
                socket.read_exact(&mut len_buf).await.unwrap();
                let mut category = vec![0u8; u32::from_le_bytes(len_buf) as usize];
                socket.read_exact(&mut category).await.unwrap();

                socket.read_exact(&mut len_buf).await.unwrap();
                let mut message = vec![0u8; u32::from_le_bytes(len_buf) as usize];
                socket.read_exact(&mut message).await.unwrap();
                received.push(String::from_utf8(message).unwrap());
            }
        }
        received
    });

    tokio::time::sleep(Duration::from_millis(1100)).await;
    store.periodic_check().await;
    assert_eq!(store.state(), BufferState::Streaming);
    assert_eq!(spooled_messages(&spool_dir).len(), 0);

    store.close().await;
    let received = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server never saw the drained batch")
        .unwrap();
    assert_eq!(received, messages);
}

#[tokio::test]
async fn test_configure_rejects_multi_primary() {
    let ctx = StoreContext::default();
    let mut store = BufferStore::new(ctx, "web", false);
    let config: chute_config::StoreConfig = toml::from_str(
        r#"
        [primary]
        type = "multi"

        [secondary]
        type = "file"
        file_path = "/tmp"
        "#,
    )
    .unwrap();
    Store::configure(&mut store, &config);

    assert!(store.status().contains("cannot be multistore"));
}

#[tokio::test]
async fn test_configure_defaults_missing_children_to_file_stores() {
    let ctx = StoreContext::default();
    let mut store = BufferStore::new(ctx, "web", false);
    Store::configure(&mut store, &chute_config::StoreConfig::new());

    // Both substores exist even though the config named neither, and the
    // bad config is visible in the status.
    assert!(store.primary.is_some());
    assert!(store.secondary.is_some());
    assert!(!store.status().is_empty());
}

#[tokio::test]
async fn test_retry_range_clamped_to_average() {
    let ctx = StoreContext::default();
    let mut store = BufferStore::new(ctx, "web", false);
    let config: chute_config::StoreConfig = toml::from_str(
        r#"
        retry_interval = 10
        retry_interval_range = 100

        [primary]
        type = "null"

        [secondary]
        type = "null"
        "#,
    )
    .unwrap();
    Store::configure(&mut store, &config);

    assert_eq!(store.retry_interval_range, 10);
    // Jitter stays inside [avg - range/2, avg + range/2].
    for seed in 0..20 {
        store.seed_jitter(seed);
        let interval = store.retry_interval();
        assert!((5..15).contains(&interval), "interval {} out of range", interval);
    }
}

#[tokio::test]
async fn test_seeded_jitter_is_deterministic() {
    let ctx = StoreContext::default();
    let mut first = BufferStore::new(ctx.clone(), "web", false);
    let mut second = BufferStore::new(ctx, "web", false);

    first.seed_jitter(42);
    second.seed_jitter(42);
    assert_eq!(first.retry_interval(), second.retry_interval());
}

#[tokio::test]
async fn test_status_prefers_secondary_errors() {
    let ctx = StoreContext::default();
    let mut store = BufferStore::new(ctx, "web", false);
    let config: chute_config::StoreConfig = toml::from_str(
        r#"
        [primary]
        type = "null"

        [secondary]
        type = "null"
        "#,
    )
    .unwrap();
    Store::configure(&mut store, &config);
    assert!(store.status().is_empty());

    store.core.set_status("own trouble");
    assert_eq!(store.status(), "own trouble");
}
