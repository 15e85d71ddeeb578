//! Full CRUD context: list, detail item, create, update and delete.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    ContextCore, ContextState, DeleteItem, ExtraData, FetchItem, FetchItems, Phase, SaveItem,
    spawn_store_sync,
};
use crate::config::{ConfigError, ContextConfig};
use crate::data_source::DataSource;
use crate::error::OperationKind;
use crate::notify::Notifier;
use crate::pagination::{Page, PaginationView};
use crate::params::ParamsBag;
use crate::query_state::{NavigableStore, QuerySync};
use crate::registry::Refetch;

/// Context exposing the list, a detail item and every CRUD operation.
///
/// Each operation has its own loading flag; `fetch_items().is_loading()` only
/// reflects the list fetch.
pub struct CrudContext<T> {
    core: Arc<ContextCore<T>>,
}

impl<T> Clone for CrudContext<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T> CrudContext<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        source: DataSource<T>,
        store: Arc<dyn NavigableStore>,
        config: ContextConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            core: Arc::new(ContextCore::new(source, store, config, notifier)?),
        })
    }

    pub fn fetch_items(&self) -> FetchItems<'_, T> {
        FetchItems { core: &self.core }
    }

    pub fn fetch_item(&self) -> FetchItem<'_, T> {
        FetchItem { core: &self.core }
    }

    pub fn create_item(&self) -> SaveItem<'_, T> {
        SaveItem {
            core: &self.core,
            kind: OperationKind::Create,
        }
    }

    pub fn update_item(&self) -> SaveItem<'_, T> {
        SaveItem {
            core: &self.core,
            kind: OperationKind::Update,
        }
    }

    pub fn delete_item(&self) -> DeleteItem<'_, T> {
        DeleteItem { core: &self.core }
    }

    pub fn phase(&self) -> Phase {
        self.core.phase()
    }

    pub fn state(&self) -> ContextState<T> {
        self.core.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ContextState<T>> {
        self.core.subscribe()
    }

    pub fn list(&self) -> Option<Vec<T>> {
        self.core.snapshot().list
    }

    pub fn item(&self) -> Option<T> {
        self.core.snapshot().item
    }

    pub fn page(&self) -> Page<T> {
        self.core.snapshot().page_state()
    }

    pub fn limit(&self) -> u32 {
        self.core.config().limit
    }

    /// Parameters derived from the store right now
    pub fn current_params(&self) -> ParamsBag {
        self.core.sync().current_params()
    }

    pub fn query(&self) -> &QuerySync {
        self.core.sync()
    }

    pub fn pagination(&self) -> PaginationView {
        self.core.pagination()
    }

    pub fn extra_data(&self) -> Option<ExtraData> {
        self.core.snapshot().extra_data
    }

    /// Replace the caller context; never triggers a fetch
    pub fn set_extra_data(&self, extra_data: Option<ExtraData>) {
        self.core.set_extra_data(extra_data);
    }

    pub async fn sync_with_store(&self) -> Option<Page<T>> {
        self.core.sync_with_store().await
    }

    pub fn spawn_store_sync(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        spawn_store_sync(&self.core, shutdown)
    }

    pub fn close(&self) {
        self.core.close();
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

#[async_trait]
impl<T> Refetch for CrudContext<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn refetch(&self) -> anyhow::Result<()> {
        self.fetch_items()
            .execute(None)
            .await
            .map(|_| ())
            .ok_or_else(|| anyhow::anyhow!("list refetch failed"))
    }
}
