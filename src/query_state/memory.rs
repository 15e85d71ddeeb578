//! In-memory navigable store with back/forward-style history.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tokio::sync::watch;

use super::{NavigableStore, WriteMode};

#[derive(Debug, Default)]
struct History {
    entries: Vec<BTreeMap<String, String>>,
    writes: Vec<(BTreeMap<String, Option<String>>, WriteMode)>,
}

/// Navigable store kept in process memory.
///
/// Every write is also recorded so callers can inspect what was written and
/// in which mode.
#[derive(Debug)]
pub struct MemoryStore {
    current: Mutex<BTreeMap<String, String>>,
    history: Mutex<History>,
    version: watch::Sender<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_entries(std::iter::empty::<(String, String)>())
    }

    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            current: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            history: Mutex::new(History::default()),
            version: watch::Sender::new(0),
        }
    }

    /// Snapshot of every key currently set
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.current
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Every write applied so far, oldest first
    pub fn writes(&self) -> Vec<(BTreeMap<String, Option<String>>, WriteMode)> {
        self.history
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .writes
            .clone()
    }

    /// Number of entries that `back` can return to
    pub fn history_len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .entries
            .len()
    }

    /// Restore the previous history entry, as a browser back-navigation would.
    ///
    /// Returns `false` when there is nothing to go back to.
    pub fn back(&self) -> bool {
        let previous = self
            .history
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .entries
            .pop();
        let Some(previous) = previous else {
            return false;
        };
        *self
            .current
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = previous;
        self.bump();
        true
    }

    fn bump(&self) {
        self.version.send_modify(|version| *version += 1);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigableStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(key)
            .cloned()
    }

    fn set_all(&self, entries: BTreeMap<String, Option<String>>, mode: WriteMode) {
        {
            let mut current = self
                .current
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            let mut history = self
                .history
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());

            if mode == WriteMode::Push {
                history.entries.push(current.clone());
            }
            for (key, value) in &entries {
                match value {
                    Some(value) => {
                        current.insert(key.clone(), value.clone());
                    }
                    None => {
                        current.remove(key);
                    }
                }
            }
            history.writes.push((entries, mode));
        }
        self.bump();
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}
