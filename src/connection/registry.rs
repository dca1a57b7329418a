//! Concurrency-safe keyed registries
//!
//! Every uniqueness decision is a single atomic insert-if-absent on the map
//! shard holding the key. No operation blocks on I/O.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Map from caller- or core-chosen keys to live handles
pub struct Registry<V> {
    entries: DashMap<String, V>,
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert `value` under `key` unless the key is already present
    ///
    /// Returns false, leaving the existing entry untouched, if the key was taken.
    pub fn try_insert(&self, key: impl Into<String>, value: V) -> bool {
        match self.entries.entry(key.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// Remove the entry for `key` only if `pred` accepts its current value
    pub fn remove_if(&self, key: &str, pred: impl FnOnce(&V) -> bool) -> Option<V> {
        self.entries
            .remove_if(key, |_, value| pred(value))
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Registry<Arc<T>> {
    /// Remove `key` only while it still maps to this exact handle
    ///
    /// Returns true for exactly one caller per registered handle, so a stale
    /// loop can never evict a newer entry registered under the same key.
    pub fn remove_exact(&self, key: &str, handle: &Arc<T>) -> bool {
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }
}

impl<V: Clone> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}
