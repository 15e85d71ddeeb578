//! # Query-State Synchronizer
//!
//! Derives request parameters from a [`NavigableStore`] (query string, router
//! state, ...) and keeps pagination consistent with it: when a tracked filter
//! changes while the store points past the first page, the page key is
//! rewritten to `"1"` before any fetch sees the new filter.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::ContextConfig;
use crate::params::{LIMIT_KEY, ParamsBag};

pub use memory::MemoryStore;

/// How a store write interacts with navigation history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Append a history entry
    Push,
    /// Replace the current entry in place
    Replace,
}

/// Shareable key/value navigation state owned by the host.
pub trait NavigableStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Apply several writes at once; `None` removes a key.
    fn set_all(&self, entries: BTreeMap<String, Option<String>>, mode: WriteMode);

    /// Change counter bumped on every write, internal or external.
    fn changes(&self) -> watch::Receiver<u64>;
}

/// Outcome of reconciling with the store after it changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// A filter changed past page one; the page key was rewritten and the
    /// follow-up store change carries the fetch.
    PageReset,
    /// Page or filters changed; fetch with these parameters.
    Relevant(ParamsBag),
    /// Nothing this synchronizer tracks has changed.
    Unchanged,
}

#[derive(Debug, Default)]
struct Observed {
    filters: BTreeMap<String, Option<String>>,
    relevant_key: Option<String>,
}

/// Bridges a navigable store and a context's request parameters
pub struct QuerySync {
    store: Arc<dyn NavigableStore>,
    page_param: String,
    limit: u32,
    url_params: Vec<String>,
    observed: Mutex<Observed>,
}

impl QuerySync {
    /// Create a synchronizer, taking the store's current filter values as
    /// the baseline for change detection.
    pub fn new(store: Arc<dyn NavigableStore>, config: &ContextConfig) -> Self {
        let sync = Self {
            store,
            page_param: config.page_param.clone(),
            limit: config.limit,
            url_params: config.url_params.clone(),
            observed: Mutex::new(Observed::default()),
        };
        let filters = sync.read_filters();
        sync.lock().filters = filters;
        sync
    }

    pub fn page_param(&self) -> &str {
        &self.page_param
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn url_params(&self) -> &[String] {
        &self.url_params
    }

    pub fn store(&self) -> &Arc<dyn NavigableStore> {
        &self.store
    }

    /// Current request parameters.
    ///
    /// Always carries `limit`. The page is included only when the store holds
    /// a positive integer; filters only when present.
    pub fn current_params(&self) -> ParamsBag {
        let mut params = ParamsBag::new().with(LIMIT_KEY, self.limit);
        if let Some(page) = self.current_page() {
            params.insert(self.page_param.clone(), page);
        }
        for key in &self.url_params {
            if let Some(value) = self.store.get(key) {
                params.insert(key.clone(), value);
            }
        }
        params
    }

    /// Page number held by the store, if it is a valid positive integer
    pub fn current_page(&self) -> Option<u32> {
        self.store
            .get(&self.page_param)
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|page| *page > 0)
    }

    /// Stable serialization of exactly the page key and the tracked filters
    pub fn relevant_key(&self) -> String {
        let mut relevant = BTreeMap::new();
        relevant.insert(self.page_param.as_str(), self.store.get(&self.page_param));
        for key in &self.url_params {
            relevant.insert(key.as_str(), self.store.get(key));
        }
        serde_json::to_string(&relevant).unwrap_or_default()
    }

    /// Reconcile with the store after a change notification.
    ///
    /// Filters are compared against the values seen on the previous pass, so
    /// several filters changing in one write trigger a single reset.
    pub fn reconcile(&self) -> StoreChange {
        let filters = self.read_filters();
        let filters_changed = {
            let mut observed = self.lock();
            if observed.filters != filters {
                observed.filters = filters;
                true
            } else {
                false
            }
        };

        if filters_changed {
            let page = self.store.get(&self.page_param);
            if page.as_deref().is_some_and(|page| page != "1") {
                info!(
                    page_param = %self.page_param,
                    previous_page = ?page,
                    "Filters changed; resetting to first page"
                );
                counter!("crud_context_page_resets_total").increment(1);
                self.store.set_all(
                    BTreeMap::from([(self.page_param.clone(), Some("1".to_string()))]),
                    WriteMode::Replace,
                );
                return StoreChange::PageReset;
            }
        }

        let key = self.relevant_key();
        let mut observed = self.lock();
        if observed.relevant_key.as_deref() == Some(key.as_str()) {
            return StoreChange::Unchanged;
        }
        debug!(relevant_key = %key, "Relevant parameters changed");
        observed.relevant_key = Some(key);
        drop(observed);
        StoreChange::Relevant(self.current_params())
    }

    /// Move to `page` without adding a history entry
    pub fn set_page(&self, page: u32) {
        self.store.set_all(
            BTreeMap::from([(self.page_param.clone(), Some(page.max(1).to_string()))]),
            WriteMode::Replace,
        );
    }

    fn read_filters(&self) -> BTreeMap<String, Option<String>> {
        self.url_params
            .iter()
            .map(|key| (key.clone(), self.store.get(key)))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Observed> {
        self.observed
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl std::fmt::Debug for QuerySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySync")
            .field("page_param", &self.page_param)
            .field("limit", &self.limit)
            .field("url_params", &self.url_params)
            .finish()
    }
}
