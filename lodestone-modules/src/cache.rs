//! Resolved module cache.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Values produced by module factories, keyed by canonical path.
///
/// Insertion is first-wins and hands back the stored `Arc`, so every
/// requester of a path sees the same value for the life of the process; the
/// cache never evicts.
pub struct ModuleCache<V> {
    modules: DashMap<String, Arc<V>>,
}

impl<V> ModuleCache<V> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            modules: DashMap::new(),
        }
    }

    /// Get the resolved value for `path`.
    pub fn get(&self, path: &str) -> Option<Arc<V>> {
        let value = self.modules.get(path).map(|v| v.value().clone());
        if value.is_some() {
            trace!(path, "module cache hit");
        }
        value
    }

    /// Cache `value` under `path` unless a value is already cached; returns
    /// the stored `Arc` either way.
    pub fn insert(&self, path: &str, value: V) -> Arc<V> {
        let stored = self
            .modules
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(value))
            .value()
            .clone();
        debug!(path, "cached resolved module");
        stored
    }

    /// Whether `path` has a resolved value.
    pub fn contains(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    /// Number of resolved modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether nothing has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Canonical paths of every resolved module.
    pub fn resolved_paths(&self) -> Vec<String> {
        self.modules.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl<V> Default for ModuleCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
