use super::*;
use chute_protocol::{batch_from_messages, LogEntry};
use tempfile::TempDir;

async fn router_from(toml: &str) -> Router {
    let config: DaemonConfig = toml.parse().expect("test config should parse");
    Router::from_config(StoreContext::default(), &config).await
}

#[tokio::test]
async fn test_routes_by_exact_category() {
    let dir = TempDir::new().unwrap();
    let router = router_from(&format!(
        r#"
        [[store]]
        category = "web"
        type = "file"
        file_path = "{}"
        base_filename = "web"
        add_newlines = "yes"
        create_symlink = "no"
        "#,
        dir.path().display()
    ))
    .await;

    let batch = batch_from_messages("web", ["hello"]);
    assert_eq!(router.log(batch).await, ResultCode::Ok);
    router.close_all().await;

    let contents = std::fs::read_to_string(dir.path().join("web_00000")).unwrap();
    assert_eq!(contents, "hello\n");
    assert_eq!(router.counters().get("web", "received good"), 1);
}

#[tokio::test]
async fn test_unmatched_category_is_try_later() {
    let router = router_from(
        r#"
        [[store]]
        category = "web"
        type = "null"
        "#,
    )
    .await;

    let batch = batch_from_messages("db", ["orphan"]);
    assert_eq!(router.log(batch).await, ResultCode::TryLater);
}

#[tokio::test]
async fn test_default_tree_cloned_per_category() {
    let dir = TempDir::new().unwrap();
    let router = router_from(&format!(
        r#"
        [[store]]
        category = "default"
        type = "file"
        file_path = "{}"
        add_newlines = "yes"
        create_symlink = "no"
        "#,
        dir.path().display()
    ))
    .await;

    let batch = vec![
        std::sync::Arc::new(LogEntry::new("db", "query\n")),
        std::sync::Arc::new(LogEntry::new("cache", "hit\n")),
        std::sync::Arc::new(LogEntry::new("db", "another\n")),
    ];
    let batch: chute_protocol::LogBatch = batch;
    assert_eq!(router.log(batch).await, ResultCode::Ok);
    router.close_all().await;

    // One cloned tree per category, each writing its own directory.
    assert!(dir.path().join("db").join("db_00000").exists());
    assert!(dir.path().join("cache").join("cache_00000").exists());
    let db = std::fs::read_to_string(dir.path().join("db").join("db_00000")).unwrap();
    assert!(db.contains("query"));
    assert!(db.contains("another"));
}

#[tokio::test]
async fn test_mixed_batch_splits_by_category() {
    let dir = TempDir::new().unwrap();
    let router = router_from(&format!(
        r#"
        [[store]]
        category = "web"
        type = "file"
        file_path = "{}"
        base_filename = "web"
        add_newlines = "yes"
        create_symlink = "no"

        [[store]]
        category = "app"
        type = "null"
        "#,
        dir.path().display()
    ))
    .await;

    let batch = vec![
        std::sync::Arc::new(LogEntry::new("web", "w")),
        std::sync::Arc::new(LogEntry::new("app", "a")),
    ];
    assert_eq!(router.log(batch).await, ResultCode::Ok);
    router.close_all().await;

    let web = std::fs::read_to_string(dir.path().join("web_00000")).unwrap();
    assert_eq!(web, "w\n");
    assert_eq!(router.counters().get("app", "ignored"), 1);
}

#[tokio::test]
async fn test_empty_batch_is_ok() {
    let router = router_from("").await;
    assert_eq!(router.log(Vec::new()).await, ResultCode::Ok);
}

#[tokio::test]
async fn test_statuses_reports_per_tree() {
    let router = router_from(
        r#"
        [[store]]
        category = "web"
        type = "null"
        "#,
    )
    .await;

    let statuses = router.statuses().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].0, "web");
    assert!(statuses[0].1.is_empty());
}

#[tokio::test]
async fn test_periodic_check_runs_without_trees() {
    let router = router_from("").await;
    router.periodic_check_all().await;
    router.flush_all().await;
}
