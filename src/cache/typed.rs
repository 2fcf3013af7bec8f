//! Tier 1: a bounded, process-local LRU over Moka.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::trace;

use super::CacheConfig;

/// Named Moka cache with strict LRU eviction and an optional TTL.
///
/// Never suspends; safe to share across threads. Clones share the same
/// entries.
pub struct TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    entries: Cache<K, V>,
    name: Arc<str>,
}

impl<K, V> Clone for TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            name: Arc::clone(&self.name),
        }
    }
}

impl<K, V> TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<Arc<str>>, config: CacheConfig) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(config.max_capacity)
            .eviction_policy(EvictionPolicy::lru());

        if let Some(ttl) = config.ttl {
            builder = builder.time_to_live(ttl);
        }

        Self {
            entries: builder.build(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `value`, replacing any previous entry wholesale. Evicts the
    /// least-recently-used entry when full.
    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    /// Expired entries read as absent. A hit marks the entry
    /// most-recently-used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key)
    }

    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
        trace!("Cleared cache {}", self.name);
    }

    /// Remove every entry whose key matches `predicate`.
    ///
    /// Completes before returning: a `get` issued afterwards never sees a
    /// purged entry. Returns the number of entries removed.
    pub fn purge<F>(&self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        let doomed: Vec<Arc<K>> = self
            .entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key)
            .collect();

        for key in &doomed {
            self.entries.invalidate(key.as_ref());
        }

        trace!("Purged {} entries from cache {}", doomed.len(), self.name);
        doomed.len()
    }

    /// Approximate; pending maintenance may lag behind.
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks();
    }
}

impl<K, V> fmt::Debug for TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedCache")
            .field("name", &self.name)
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}
