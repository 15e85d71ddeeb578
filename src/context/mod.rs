//! # List/CRUD Context Managers
//!
//! A context binds a [`DataSource`] to a navigable store. It keeps the
//! committed list state, the optional detail item and one executor per
//! operation, and republishes every change through a `watch` channel.
//!
//! Two surfaces share the same core:
//! - [`ListContext`]: list retrieval plus create/delete
//! - [`CrudContext`]: list, detail item and full CRUD
//!
//! List fetches are generation-gated: every request takes the next generation
//! number and only the newest request may commit, whatever order the data
//! source answers in.

pub mod crud;
pub mod list;


use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use metrics::counter;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::{ConfigError, ContextConfig};
use crate::data_source::{DataSource, ItemKey};
use crate::error::{CrudError, OperationKind};
use crate::executor::AsyncOperation;
use crate::notify::Notifier;
use crate::pagination::{Page, PaginationView, normalize};
use crate::params::ParamsBag;
use crate::query_state::{NavigableStore, QuerySync, StoreChange};

pub use crud::CrudContext;
pub use list::ListContext;

/// Opaque caller-supplied context
pub type ExtraData = serde_json::Map<String, serde_json::Value>;

/// What a context is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    FetchingList,
    FetchingItem,
    Mutating,
}

/// Snapshot of a context's committed state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextState<T> {
    pub list: Option<Vec<T>>,
    pub item: Option<T>,
    pub page: u32,
    pub pages: u32,
    pub total: u64,
    pub limit: u32,
    /// Parameters of the committed list fetch
    pub params: ParamsBag,
    pub extra_data: Option<ExtraData>,
    /// Generation of the committed list fetch; `0` before the first commit
    pub generation: u64,
}

impl<T> ContextState<T> {
    fn initial(config: &ContextConfig, params: ParamsBag) -> Self {
        let page = Page::<T>::reset();
        Self {
            list: page.list,
            item: None,
            page: page.page,
            pages: page.pages,
            total: page.total,
            limit: config.limit,
            params,
            extra_data: config.extra_data.clone(),
            generation: 0,
        }
    }

    /// List fields as a [`Page`]
    pub fn page_state(&self) -> Page<T>
    where
        T: Clone,
    {
        Page {
            list: self.list.clone(),
            page: self.page,
            pages: self.pages,
            total: self.total,
        }
    }
}

/// State and operations shared by both context surfaces
pub(crate) struct ContextCore<T> {
    source: DataSource<T>,
    sync: QuerySync,
    config: ContextConfig,
    fetch_items: AsyncOperation,
    fetch_item: AsyncOperation,
    create_item: AsyncOperation,
    update_item: AsyncOperation,
    delete_item: AsyncOperation,
    list_generation: AtomicU64,
    item_generation: AtomicU64,
    closed: AtomicBool,
    shutdown: CancellationToken,
    state: watch::Sender<ContextState<T>>,
}

impl<T> ContextCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        source: DataSource<T>,
        store: Arc<dyn NavigableStore>,
        config: ContextConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let operation = |kind: OperationKind, name: &str| {
            AsyncOperation::new(name, notifier.clone()).with_messages(source.messages(kind))
        };
        let fetch_items = operation(OperationKind::List, "fetch_items");
        let fetch_item = operation(OperationKind::GetItem, "fetch_item");
        let create_item = operation(OperationKind::Create, "create_item");
        let update_item = operation(OperationKind::Update, "update_item");
        let delete_item = operation(OperationKind::Delete, "delete_item");

        let sync = QuerySync::new(store, &config);
        let state = watch::Sender::new(ContextState::initial(&config, sync.current_params()));

        Ok(Self {
            source,
            sync,
            config,
            fetch_items,
            fetch_item,
            create_item,
            update_item,
            delete_item,
            list_generation: AtomicU64::new(0),
            item_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            state,
        })
    }

    pub(crate) fn snapshot(&self) -> ContextState<T> {
        self.state.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ContextState<T>> {
        self.state.subscribe()
    }

    pub(crate) fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub(crate) fn sync(&self) -> &QuerySync {
        &self.sync
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn phase(&self) -> Phase {
        if self.create_item.is_loading()
            || self.update_item.is_loading()
            || self.delete_item.is_loading()
        {
            Phase::Mutating
        } else if self.fetch_items.is_loading() {
            Phase::FetchingList
        } else if self.fetch_item.is_loading() {
            Phase::FetchingItem
        } else {
            Phase::Idle
        }
    }

    pub(crate) fn pagination(&self) -> PaginationView {
        let state = self.state.borrow();
        PaginationView {
            page: state.page,
            pages: state.pages,
            total: state.total,
            page_param: self.config.page_param.clone(),
            is_loading: self.fetch_items.is_loading(),
            has_next: state.page < state.pages,
            has_previous: state.page > 1,
        }
    }

    pub(crate) fn set_extra_data(&self, extra_data: Option<ExtraData>) {
        self.state.send_modify(|state| state.extra_data = extra_data);
    }

    /// Fetch the list and commit it if no newer fetch was requested meanwhile.
    ///
    /// Returns the normalized page on success, committed or not.
    pub(crate) async fn fetch_items(&self, params: Option<ParamsBag>) -> Option<Page<T>> {
        let params = params.unwrap_or_else(|| self.sync.current_params());
        let limit = params.limit().unwrap_or(self.config.limit);
        let generation = self.list_generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, params = ?params, "Fetching list");

        let response = self
            .fetch_items
            .execute(|| self.source.list(params.clone()))
            .await;
        let succeeded = response.is_some();
        let page = normalize(response, limit);

        if self.is_closed() || self.list_generation.load(Ordering::SeqCst) != generation {
            counter!("crud_context_stale_results_total", "operation" => "fetch_items").increment(1);
            debug!(generation, "Discarding superseded list result");
        } else {
            let committed = page.clone();
            self.state.send_modify(|state| {
                state.list = committed.list;
                state.page = committed.page;
                state.pages = committed.pages;
                state.total = committed.total;
                state.limit = limit;
                state.params = params;
                state.generation = generation;
            });
            debug!(generation, total = page.total, "Committed list");
        }

        succeeded.then_some(page)
    }

    /// Fetch a single item; newer requests win as for lists.
    pub(crate) async fn fetch_item(&self, key: Option<ItemKey>) -> Result<Option<T>, CrudError> {
        let key = key
            .or_else(|| self.config.single_item_id.clone().map(ItemKey::Id))
            .unwrap_or_else(|| ItemKey::Params(self.sync.current_params()));
        let request = self.source.get_item(key)?;
        let generation = self.item_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let Some(item) = self.fetch_item.execute(|| request).await else {
            return Ok(None);
        };

        if self.is_closed() || self.item_generation.load(Ordering::SeqCst) != generation {
            counter!("crud_context_stale_results_total", "operation" => "fetch_item").increment(1);
            debug!(generation, "Discarding superseded item result");
        } else {
            let committed = item.clone();
            self.state.send_modify(|state| state.item = committed);
        }
        Ok(item)
    }

    pub(crate) async fn create_item(&self, entity: T) -> Result<Option<T>, CrudError> {
        let request = self.source.create(entity)?;
        Ok(self.create_item.execute(|| request).await.flatten())
    }

    pub(crate) async fn update_item(&self, entity: T) -> Result<Option<T>, CrudError> {
        let request = self.source.update(entity)?;
        Ok(self.update_item.execute(|| request).await.flatten())
    }

    pub(crate) async fn delete_item(&self, entity: T) -> Result<Option<()>, CrudError> {
        let request = self.source.delete(entity)?;
        Ok(self.delete_item.execute(|| request).await)
    }

    /// Reconcile with the store and fetch when relevant parameters changed
    pub(crate) async fn sync_with_store(&self) -> Option<Page<T>> {
        match self.sync.reconcile() {
            StoreChange::Relevant(params) => self.fetch_items(Some(params)).await,
            StoreChange::PageReset | StoreChange::Unchanged => None,
        }
    }

    /// Stop reacting to the store and ignore every in-flight result
    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.list_generation.fetch_add(1, Ordering::SeqCst);
            self.item_generation.fetch_add(1, Ordering::SeqCst);
            self.shutdown.cancel();
            info!("Context closed");
        }
    }

    fn operation(&self, kind: OperationKind) -> &AsyncOperation {
        match kind {
            OperationKind::List => &self.fetch_items,
            OperationKind::GetItem => &self.fetch_item,
            OperationKind::Create => &self.create_item,
            OperationKind::Update => &self.update_item,
            OperationKind::Delete => &self.delete_item,
        }
    }

    pub(crate) fn is_loading(&self, kind: OperationKind) -> bool {
        self.operation(kind).is_loading()
    }
}

impl<T> Drop for ContextCore<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Spawn the loop that follows store changes.
///
/// The first pass runs immediately, so the initial list fetch happens on
/// mount. Each fetch runs in its own task so a newer store change can
/// supersede a slow request. The loop ends on `shutdown`, on
/// [`ListContext::close`]/[`CrudContext::close`], or once the context is
/// dropped.
pub(crate) fn spawn_store_sync<T>(
    core: &Arc<ContextCore<T>>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
{
    let weak = Arc::downgrade(core);
    let closed = core.shutdown.clone();
    let mut changes = core.sync.store().changes();

    tokio::spawn(async move {
        run_store_sync(weak, &mut changes, shutdown, closed).await;
    })
}

#[instrument(skip_all)]
async fn run_store_sync<T>(
    core: Weak<ContextCore<T>>,
    changes: &mut watch::Receiver<u64>,
    shutdown: CancellationToken,
    closed: CancellationToken,
) where
    T: Clone + Send + Sync + 'static,
{
    info!("Store sync started");
    changes.mark_changed();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = closed.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(core) = core.upgrade() else {
                    break;
                };
                if let StoreChange::Relevant(params) = core.sync.reconcile() {
                    tokio::spawn(async move {
                        core.fetch_items(Some(params)).await;
                    });
                }
            }
        }
    }

    info!("Store sync stopped");
}

/// Handle on the list fetch of a context
pub struct FetchItems<'a, T> {
    core: &'a ContextCore<T>,
}

impl<T> FetchItems<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Fetch with `params`, or with the store-derived parameters when `None`.
    ///
    /// Returns `None` when the data source failed (already notified).
    pub async fn execute(&self, params: Option<ParamsBag>) -> Option<Page<T>> {
        self.core.fetch_items(params).await
    }

    pub fn is_loading(&self) -> bool {
        self.core.is_loading(OperationKind::List)
    }
}

/// Handle on the single-item fetch of a context
pub struct FetchItem<'a, T> {
    core: &'a ContextCore<T>,
}

impl<T> FetchItem<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Fetch by `key`, falling back to the configured item id and then to the
    /// current store parameters.
    pub async fn execute(&self, key: Option<ItemKey>) -> Result<Option<T>, CrudError> {
        self.core.fetch_item(key).await
    }

    pub fn is_loading(&self) -> bool {
        self.core.is_loading(OperationKind::GetItem)
    }
}

/// Handle on a create or update function
pub struct SaveItem<'a, T> {
    core: &'a ContextCore<T>,
    kind: OperationKind,
}

impl<T> SaveItem<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Run the function. The list is not refetched; callers decide when.
    pub async fn execute(&self, entity: T) -> Result<Option<T>, CrudError> {
        match self.kind {
            OperationKind::Update => self.core.update_item(entity).await,
            _ => self.core.create_item(entity).await,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.core.is_loading(self.kind)
    }
}

/// Handle on the delete function
pub struct DeleteItem<'a, T> {
    core: &'a ContextCore<T>,
}

impl<T> DeleteItem<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// `Some(())` once the data source confirmed the delete
    pub async fn execute(&self, entity: T) -> Result<Option<()>, CrudError> {
        self.core.delete_item(entity).await
    }

    pub fn is_loading(&self) -> bool {
        self.core.is_loading(OperationKind::Delete)
    }
}
