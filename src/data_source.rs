//! # Data Source Contract
//!
//! A [`DataSource`] bundles the asynchronous functions a context manager can
//! call for one entity type. Only `list` is mandatory; asking a context to run
//! a function that was never supplied is a [`CrudError`], not an operational
//! failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::{CrudError, OperationKind};
use crate::executor::OperationMessages;
use crate::pagination::ListResponse;
use crate::params::{ParamValue, ParamsBag};

/// Boxed future returned by data source functions
pub type SourceFuture<R> = BoxFuture<'static, anyhow::Result<R>>;

type ListFn<T> = Arc<dyn Fn(ParamsBag) -> SourceFuture<ListResponse<T>> + Send + Sync>;
type GetFn<T> = Arc<dyn Fn(ItemKey) -> SourceFuture<Option<T>> + Send + Sync>;
type EntityFn<T, R> = Arc<dyn Fn(T) -> SourceFuture<R> + Send + Sync>;

/// Key passed to a single-item fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKey {
    Params(ParamsBag),
    Id(ParamValue),
}

impl ItemKey {
    pub fn id(&self) -> Option<&ParamValue> {
        match self {
            ItemKey::Id(id) => Some(id),
            ItemKey::Params(_) => None,
        }
    }
}

impl From<ParamsBag> for ItemKey {
    fn from(params: ParamsBag) -> Self {
        ItemKey::Params(params)
    }
}

impl From<ParamValue> for ItemKey {
    fn from(id: ParamValue) -> Self {
        ItemKey::Id(id)
    }
}

impl From<i64> for ItemKey {
    fn from(id: i64) -> Self {
        ItemKey::Id(ParamValue::Int(id))
    }
}

impl From<&str> for ItemKey {
    fn from(id: &str) -> Self {
        ItemKey::Id(ParamValue::from(id))
    }
}

impl From<String> for ItemKey {
    fn from(id: String) -> Self {
        ItemKey::Id(ParamValue::Str(id))
    }
}

/// Functions a context manager runs against an external source of `T`
pub struct DataSource<T> {
    list: ListFn<T>,
    get_item: Option<GetFn<T>>,
    create: Option<EntityFn<T, Option<T>>>,
    update: Option<EntityFn<T, Option<T>>>,
    delete: Option<EntityFn<T, ()>>,
    messages: HashMap<OperationKind, OperationMessages>,
}

impl<T: Send + 'static> DataSource<T> {
    /// Create a data source from its list function
    pub fn new<F, Fut>(list: F) -> Self
    where
        F: Fn(ParamsBag) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ListResponse<T>>> + Send + 'static,
    {
        Self {
            list: Arc::new(move |params| list(params).boxed()),
            get_item: None,
            create: None,
            update: None,
            delete: None,
            messages: HashMap::new(),
        }
    }

    pub fn with_get_item<F, Fut>(mut self, get_item: F) -> Self
    where
        F: Fn(ItemKey) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        self.get_item = Some(Arc::new(move |key| get_item(key).boxed()));
        self
    }

    pub fn with_create<F, Fut>(mut self, create: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        self.create = Some(Arc::new(move |entity| create(entity).boxed()));
        self
    }

    pub fn with_update<F, Fut>(mut self, update: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        self.update = Some(Arc::new(move |entity| update(entity).boxed()));
        self
    }

    pub fn with_delete<F, Fut>(mut self, delete: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.delete = Some(Arc::new(move |entity| delete(entity).boxed()));
        self
    }

    /// Attach notification messages to one function
    pub fn with_messages(mut self, operation: OperationKind, messages: OperationMessages) -> Self {
        self.messages.insert(operation, messages);
        self
    }
}

impl<T> DataSource<T> {
    /// Messages declared for `operation`, empty when none were attached
    pub fn messages(&self, operation: OperationKind) -> OperationMessages {
        self.messages.get(&operation).cloned().unwrap_or_default()
    }

    /// Whether the function behind `operation` was supplied
    pub fn supports(&self, operation: OperationKind) -> bool {
        match operation {
            OperationKind::List => true,
            OperationKind::GetItem => self.get_item.is_some(),
            OperationKind::Create => self.create.is_some(),
            OperationKind::Update => self.update.is_some(),
            OperationKind::Delete => self.delete.is_some(),
        }
    }

    pub fn list(&self, params: ParamsBag) -> SourceFuture<ListResponse<T>> {
        (self.list)(params)
    }

    pub fn get_item(&self, key: ItemKey) -> Result<SourceFuture<Option<T>>, CrudError> {
        let get_item = self
            .get_item
            .as_ref()
            .ok_or(CrudError::missing(OperationKind::GetItem))?;
        Ok(get_item(key))
    }

    pub fn create(&self, entity: T) -> Result<SourceFuture<Option<T>>, CrudError> {
        let create = self
            .create
            .as_ref()
            .ok_or(CrudError::missing(OperationKind::Create))?;
        Ok(create(entity))
    }

    pub fn update(&self, entity: T) -> Result<SourceFuture<Option<T>>, CrudError> {
        let update = self
            .update
            .as_ref()
            .ok_or(CrudError::missing(OperationKind::Update))?;
        Ok(update(entity))
    }

    pub fn delete(&self, entity: T) -> Result<SourceFuture<()>, CrudError> {
        let delete = self
            .delete
            .as_ref()
            .ok_or(CrudError::missing(OperationKind::Delete))?;
        Ok(delete(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> DataSource<u32> {
        DataSource::new(|_params| async { Ok(ListResponse::Items(vec![1, 2, 3])) })
    }

    #[tokio::test]
    async fn list_is_always_available() {
        let source = source();
        assert!(source.supports(OperationKind::List));
        let response = source.list(ParamsBag::new()).await.unwrap();
        assert_eq!(response, ListResponse::Items(vec![1, 2, 3]));
    }

    #[test]
    fn missing_functions_are_configuration_errors() {
        let source = source();
        assert_eq!(
            source.create(4).err(),
            Some(CrudError::missing(OperationKind::Create))
        );
        assert_eq!(
            source.update(4).err(),
            Some(CrudError::missing(OperationKind::Update))
        );
        assert_eq!(
            source.delete(4).err(),
            Some(CrudError::missing(OperationKind::Delete))
        );
        assert_eq!(
            source.get_item(ItemKey::from(4_i64)).err(),
            Some(CrudError::missing(OperationKind::GetItem))
        );
    }

    #[tokio::test]
    async fn supplied_functions_receive_their_arguments() {
        let source = source()
            .with_create(|n| async move { Ok(Some(n * 10)) })
            .with_get_item(|key| async move {
                Ok(key.id().and_then(ParamValue::as_i64).map(|id| id as u32))
            })
            .with_messages(OperationKind::Create, OperationMessages::success("Created"));

        assert!(source.supports(OperationKind::Create));
        assert!(!source.supports(OperationKind::Delete));
        assert_eq!(source.create(4).unwrap().await.unwrap(), Some(40));
        assert_eq!(
            source.get_item(ItemKey::from("9")).unwrap().await.unwrap(),
            Some(9)
        );
        assert_eq!(
            source.messages(OperationKind::Create).success_message.as_deref(),
            Some("Created")
        );
        assert_eq!(source.messages(OperationKind::Delete), OperationMessages::default());
    }
}
