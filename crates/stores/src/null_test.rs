use super::*;
use crate::store::{Store, StoreContext};
use chrono::Local;
use chute_protocol::batch_from_messages;

#[tokio::test]
async fn test_discards_and_counts() {
    let ctx = StoreContext::default();
    let mut store = NullStore::new(ctx.clone(), "web", false);
    assert!(store.open().await);
    assert!(store.is_open());

    let mut batch = batch_from_messages("web", ["a", "b", "c"]);
    assert!(store.handle_messages(&mut batch).await);
    assert!(batch.is_empty());
    assert_eq!(ctx.counters.get("web", "ignored"), 3);

    let mut more = batch_from_messages("web", ["d"]);
    assert!(store.handle_messages(&mut more).await);
    assert_eq!(ctx.counters.get("web", "ignored"), 4);
}

#[tokio::test]
async fn test_spool_protocol_is_trivially_empty() {
    let ctx = StoreContext::default();
    let mut store = NullStore::new(ctx, "web", false);
    let now = Local::now();

    let mut out = Vec::new();
    assert!(store.read_oldest(now, &mut out).await);
    assert!(out.is_empty());

    let mut batch = batch_from_messages("web", ["x"]);
    assert!(store.replace_oldest(&mut batch, now).await);
    store.delete_oldest(now).await;
    assert!(store.empty(now).await);
}

#[tokio::test]
async fn test_copy() {
    let ctx = StoreContext::default();
    let store = NullStore::new(ctx.clone(), "web", false);
    let mut copied = Store::copy(&store, "app");

    let mut batch = batch_from_messages("app", ["x"]);
    assert!(copied.handle_messages(&mut batch).await);
    assert_eq!(ctx.counters.get("app", "ignored"), 1);
}
