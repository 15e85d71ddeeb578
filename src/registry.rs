//! Invalidation registry
//!
//! Process-wide table mapping string keys to refetch subscribers, so one
//! mutation can refresh every list that depends on it. Contexts participate by
//! implementing [`Refetch`]; nothing here depends on them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use metrics::counter;
use tracing::{debug, warn};

/// Something that can reload its data on demand
#[async_trait]
pub trait Refetch: Send + Sync {
    async fn refetch(&self) -> anyhow::Result<()>;
}

/// [`Refetch`] backed by an async closure
pub struct RefetchFn<F>(F);

#[async_trait]
impl<F, Fut> Refetch for RefetchFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn refetch(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

/// Wrap an async closure as a shareable [`Refetch`]
pub fn refetch_fn<F, Fut>(f: F) -> Arc<dyn Refetch>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(RefetchFn(f))
}

type Subscribers = HashMap<String, HashMap<u64, Arc<dyn Refetch>>>;

/// Global invalidation registry instance
static REGISTRY: OnceLock<InvalidationRegistry> = OnceLock::new();

/// Outcome of an [`InvalidationRegistry::invalidate`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub refreshed: usize,
    pub failed: usize,
}

/// Registry of refetch subscribers keyed by string
pub struct InvalidationRegistry {
    subscribers: Arc<RwLock<Subscribers>>,
    next_id: AtomicU64,
}

impl InvalidationRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Get the global registry instance
    pub fn global() -> &'static InvalidationRegistry {
        REGISTRY.get_or_init(Self::new)
    }

    /// Subscribe `refetch` under `key` until the returned guard is dropped
    pub fn subscribe(&self, key: impl Into<String>, refetch: Arc<dyn Refetch>) -> Subscription {
        let key = key.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .entry(key.clone())
            .or_default()
            .insert(id, refetch);
        debug!(%key, id, "Refetch subscriber registered");

        Subscription {
            subscribers: Arc::downgrade(&self.subscribers),
            key,
            id,
        }
    }

    /// Number of live subscribers under `key`
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(key)
            .map_or(0, HashMap::len)
    }

    /// Refetch every subscriber of `keys` concurrently.
    ///
    /// Individual failures are logged and counted, never returned.
    pub async fn invalidate<I, S>(&self, keys: I) -> InvalidationReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets: Vec<(String, Arc<dyn Refetch>)> = {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(|poison| poison.into_inner());
            keys.into_iter()
                .filter_map(|key| {
                    subscribers
                        .get(key.as_ref())
                        .map(|entries| (key.as_ref().to_string(), entries))
                })
                .flat_map(|(key, entries)| {
                    entries
                        .values()
                        .map(move |refetch| (key.clone(), refetch.clone()))
                })
                .collect()
        };

        counter!("crud_context_invalidations_total").increment(targets.len() as u64);

        let results = join_all(targets.iter().map(|(key, refetch)| async move {
            let outcome = refetch.refetch().await;
            if let Err(err) = &outcome {
                warn!(%key, error = ?err, "Refetch after invalidation failed");
            }
            outcome.is_ok()
        }))
        .await;

        let refreshed = results.iter().filter(|ok| **ok).count();
        InvalidationReport {
            refreshed,
            failed: results.len() - refreshed,
        }
    }
}

impl Default for InvalidationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration guard; unsubscribes on drop
pub struct Subscription {
    subscribers: Weak<RwLock<Subscribers>>,
    key: String,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Unsubscribe now rather than at drop
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(subscribers) = self.subscribers.upgrade() else {
            return;
        };
        let mut subscribers = subscribers
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        if let Some(entries) = subscribers.get_mut(&self.key) {
            entries.remove(&self.id);
            if entries.is_empty() {
                subscribers.remove(&self.key);
            }
        }
        debug!(key = %self.key, id = self.id, "Refetch subscriber removed");
    }
}
