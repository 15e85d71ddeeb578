//! In-memory data source backed by a `Vec`.
//!
//! Answers list requests with paginated envelopes sliced according to the
//! request's `limit` and page parameter. Handy for demos, fixtures and tests.

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};

use crate::data_source::{DataSource, ItemKey};
use crate::pagination::{ListResponse, PaginatedEnvelope, page_count};
use crate::params::{LIMIT_KEY, ParamValue, ParamsBag};

type KeyFn<T> = Arc<dyn Fn(&T) -> ParamValue + Send + Sync>;
type FilterFn<T> = Arc<dyn Fn(&T, &ParamsBag) -> bool + Send + Sync>;

/// Vec-backed entity store
pub struct MemorySource<T> {
    items: Mutex<Vec<T>>,
    key: KeyFn<T>,
    filter: Option<FilterFn<T>>,
    page_param: String,
}

impl<T> MemorySource<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a source identifying entities by `key`
    pub fn new(items: Vec<T>, key: impl Fn(&T) -> ParamValue + Send + Sync + 'static) -> Self {
        Self {
            items: Mutex::new(items),
            key: Arc::new(key),
            filter: None,
            page_param: "page".to_string(),
        }
    }

    /// Keep only entities for which `filter` holds for the request params
    pub fn with_filter(
        mut self,
        filter: impl Fn(&T, &ParamsBag) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_page_param(mut self, page_param: impl Into<String>) -> Self {
        self.page_param = page_param.into();
        self
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn items(&self) -> Vec<T> {
        self.lock().clone()
    }

    /// One page of matching entities
    pub fn page(&self, params: &ParamsBag) -> PaginatedEnvelope<T> {
        let matching: Vec<T> = self
            .lock()
            .iter()
            .filter(|item| self.filter.as_ref().is_none_or(|filter| filter(*item, params)))
            .cloned()
            .collect();

        let total = matching.len() as u64;
        let limit = params.limit().unwrap_or(0);
        if limit == 0 {
            return PaginatedEnvelope {
                list: matching,
                page: 1,
                pages: 1,
                total,
            };
        }

        let page = params.page(&self.page_param);
        let start = (page as usize - 1).saturating_mul(limit as usize);
        PaginatedEnvelope {
            list: matching.into_iter().skip(start).take(limit as usize).collect(),
            page,
            pages: page_count(total, limit),
            total,
        }
    }

    pub fn get(&self, key: &ItemKey) -> Option<T> {
        let id = match key {
            ItemKey::Id(id) => id.clone(),
            ItemKey::Params(params) => params.get("id")?.clone(),
        };
        self.lock()
            .iter()
            .find(|item| same_key(&(self.key)(*item), &id))
            .cloned()
    }

    pub fn insert(&self, entity: T) -> Result<T> {
        let id = (self.key)(&entity);
        let mut items = self.lock();
        if items.iter().any(|item| same_key(&(self.key)(item), &id)) {
            return Err(anyhow!("an entity with id {id} already exists"));
        }
        items.push(entity.clone());
        Ok(entity)
    }

    pub fn replace(&self, entity: T) -> Result<T> {
        let id = (self.key)(&entity);
        let mut items = self.lock();
        let slot = items
            .iter_mut()
            .find(|item| same_key(&(self.key)(&**item), &id))
            .ok_or_else(|| anyhow!("entity {id} not found"))?;
        *slot = entity.clone();
        Ok(entity)
    }

    pub fn remove(&self, entity: &T) -> Result<()> {
        let id = (self.key)(entity);
        let mut items = self.lock();
        let before = items.len();
        items.retain(|item| !same_key(&(self.key)(item), &id));
        if items.len() == before {
            return Err(anyhow!("entity {id} not found"));
        }
        Ok(())
    }

    /// Expose the store through every data source function
    pub fn into_data_source(self: Arc<Self>) -> DataSource<T> {
        let list = self.clone();
        let get = self.clone();
        let create = self.clone();
        let update = self.clone();
        let delete = self;

        DataSource::new(move |params| {
            let source = list.clone();
            async move { Ok(ListResponse::Paginated(source.page(&params))) }
        })
        .with_get_item(move |key| {
            let source = get.clone();
            async move { Ok(source.get(&key)) }
        })
        .with_create(move |entity| {
            let source = create.clone();
            async move { source.insert(entity).map(Some) }
        })
        .with_update(move |entity| {
            let source = update.clone();
            async move { source.replace(entity).map(Some) }
        })
        .with_delete(move |entity| {
            let source = delete.clone();
            async move { source.remove(&entity) }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.items
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

fn same_key(a: &ParamValue, b: &ParamValue) -> bool {
    a == b || a.to_string() == b.to_string()
}

/// Filter for JSON records: every request param other than `limit` and the
/// page key must equal the record field of the same name.
pub fn json_field_filter(
    page_param: impl Into<String>,
) -> impl Fn(&serde_json::Value, &ParamsBag) -> bool + Send + Sync + 'static {
    let page_param = page_param.into();
    move |record: &serde_json::Value, params: &ParamsBag| {
        params
            .iter()
            .filter(|(key, _)| key.as_str() != LIMIT_KEY && **key != page_param)
            .all(|(key, expected)| match record.get(key) {
                Some(serde_json::Value::String(actual)) => *actual == expected.to_string(),
                Some(serde_json::Value::Null) | None => false,
                Some(actual) => actual.to_string() == expected.to_string(),
            })
    }
}

/// Key extractor reading `field` from a JSON record
pub fn json_key(field: impl Into<String>) -> impl Fn(&serde_json::Value) -> ParamValue + Send + Sync + 'static {
    let field = field.into();
    move |record: &serde_json::Value| match record.get(&field) {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(ParamValue::Int)
            .unwrap_or_else(|| ParamValue::Str(n.to_string())),
        Some(serde_json::Value::String(s)) => ParamValue::Str(s.clone()),
        Some(other) => ParamValue::Str(other.to_string()),
        None => ParamValue::Str(String::new()),
    }
}
