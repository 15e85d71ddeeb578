//! Shared fixtures for integration tests.
//!
//! Builds in-memory data sources and stores, and waits on asynchronous
//! context state without fixed sleeps.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use crud_context::{
    ContextConfig, CrudContext, ListContext, MemoryStore,
    memory_source::{MemorySource, json_field_filter, json_key},
    notify::{ChannelNotifier, Notification},
};
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;

/// `count` user records with ids starting at 1; every third one is inactive.
#[allow(dead_code)]
pub fn user_records(count: i64) -> Vec<Value> {
    (1..=count)
        .map(|id| {
            let status = if id % 3 == 0 { "inactive" } else { "active" };
            json!({"id": id, "name": format!("user-{id}"), "status": status})
        })
        .collect()
}

/// Memory source over `user_records`, filtered by record fields.
#[allow(dead_code)]
pub fn user_source(count: i64) -> Arc<MemorySource<Value>> {
    Arc::new(
        MemorySource::new(user_records(count), json_key("id"))
            .with_filter(json_field_filter("page")),
    )
}

/// List context over `source` with a channel notifier.
#[allow(dead_code)]
pub fn new_list_context(
    source: &Arc<MemorySource<Value>>,
    store: &Arc<MemoryStore>,
    config: ContextConfig,
) -> Result<(ListContext<Value>, UnboundedReceiver<Notification>)> {
    let (notifier, notifications) = ChannelNotifier::new();
    let context = ListContext::new(
        source.clone().into_data_source(),
        store.clone(),
        config,
        Arc::new(notifier),
    )?;
    Ok((context, notifications))
}

/// CRUD context over `source` with a channel notifier.
#[allow(dead_code)]
pub fn new_crud_context(
    source: &Arc<MemorySource<Value>>,
    store: &Arc<MemoryStore>,
    config: ContextConfig,
) -> Result<(CrudContext<Value>, UnboundedReceiver<Notification>)> {
    let (notifier, notifications) = ChannelNotifier::new();
    let context = CrudContext::new(
        source.clone().into_data_source(),
        store.clone(),
        config,
        Arc::new(notifier),
    )?;
    Ok((context, notifications))
}

/// Ids of the records in `list`, in order.
#[allow(dead_code)]
pub fn ids(list: Option<Vec<Value>>) -> Vec<i64> {
    list.unwrap_or_default()
        .iter()
        .filter_map(|record| record["id"].as_i64())
        .collect()
}

/// Poll `condition` until it holds, failing after two seconds.
#[allow(dead_code)]
pub async fn eventually(mut condition: impl FnMut() -> bool) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("condition not reached within two seconds"))
}
