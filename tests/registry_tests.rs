#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use crud_context::{
    ContextConfig, DataSource, InvalidationRegistry, ListContext, ListResponse, MemoryStore,
    notify::ChannelNotifier, registry::InvalidationReport,
};
use serde_json::{Value, json};
use test_utils::{ids, new_crud_context, new_list_context, user_source};

#[tokio::test]
async fn invalidation_refreshes_every_subscribed_context() -> Result<()> {
    let source = user_source(6);
    let active_store = Arc::new(MemoryStore::with_entries([("status", "active")]));
    let all_store = Arc::new(MemoryStore::new());
    let (active, _n1) = new_list_context(
        &source,
        &active_store,
        ContextConfig::default().with_url_params(["status"]),
    )?;
    let (all, _n2) = new_list_context(&source, &all_store, ContextConfig::default())?;
    active.fetch_items().execute(None).await.expect("initial fetch");
    all.fetch_items().execute(None).await.expect("initial fetch");

    let registry = InvalidationRegistry::global();
    let _active = registry.subscribe("registry-tests/users", Arc::new(active.clone()));
    let _all = registry.subscribe("registry-tests/users", Arc::new(all.clone()));

    let (editor, _n3) = new_crud_context(&source, &all_store, ContextConfig::default())?;
    editor
        .create_item()
        .execute(json!({"id": 7, "name": "user-7", "status": "active"}))
        .await?;
    assert_eq!(ids(all.list()), vec![1, 2, 3, 4, 5, 6]);

    let report = registry.invalidate(["registry-tests/users"]).await;

    assert_eq!(report, InvalidationReport { refreshed: 2, failed: 0 });
    assert_eq!(ids(active.list()), vec![1, 2, 4, 5, 7]);
    assert_eq!(ids(all.list()), vec![1, 2, 3, 4, 5, 6, 7]);
    Ok(())
}

#[tokio::test]
async fn failing_refetch_does_not_block_the_others() -> Result<()> {
    let source = user_source(2);
    let store = Arc::new(MemoryStore::new());
    let (healthy, _n1) = new_list_context(&source, &store, ContextConfig::default())?;

    let (notifier, mut notifications) = ChannelNotifier::new();
    let broken = ListContext::new(
        DataSource::new(|_params| async {
            Err::<ListResponse<Value>, _>(anyhow!("orders service unavailable"))
        }),
        store.clone(),
        ContextConfig::default(),
        Arc::new(notifier),
    )?;

    let registry = InvalidationRegistry::global();
    let _healthy = registry.subscribe("registry-tests/mixed", Arc::new(healthy.clone()));
    let _broken = registry.subscribe("registry-tests/mixed", Arc::new(broken.clone()));

    let report = registry.invalidate(["registry-tests/mixed"]).await;

    assert_eq!(report, InvalidationReport { refreshed: 1, failed: 1 });
    assert_eq!(ids(healthy.list()), vec![1, 2]);
    assert_eq!(broken.list(), None);
    assert_eq!(notifications.try_recv()?.message, "orders service unavailable");
    Ok(())
}

#[tokio::test]
async fn dropped_subscriptions_are_not_refetched() -> Result<()> {
    let source = user_source(2);
    let store = Arc::new(MemoryStore::new());
    let (ctx, _n) = new_list_context(&source, &store, ContextConfig::default())?;

    let registry = InvalidationRegistry::global();
    let subscription = registry.subscribe("registry-tests/dropped", Arc::new(ctx.clone()));
    assert_eq!(subscription.key(), "registry-tests/dropped");
    assert_eq!(registry.subscriber_count("registry-tests/dropped"), 1);
    drop(subscription);

    let report = registry.invalidate(["registry-tests/dropped"]).await;
    assert_eq!(report, InvalidationReport::default());
    assert_eq!(ctx.list(), None);
    Ok(())
}
