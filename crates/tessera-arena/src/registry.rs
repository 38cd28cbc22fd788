//! Keyed storage for per-thread chunk caches.

use std::hash::Hash;

use indexmap::IndexMap;

use crate::two_level::ChunkCache;

/// A map from caller-chosen thread keys to their [`ChunkCache`]s.
///
/// Useful when one driver multiplexes several logical producers, or to
/// simulate N threads deterministically in a single-threaded test. Keys
/// iterate in insertion order.
#[derive(Clone, Debug)]
pub struct ChunkRegistry<K> {
    caches: IndexMap<K, ChunkCache>,
}

impl<K: Hash + Eq> ChunkRegistry<K> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            caches: IndexMap::new(),
        }
    }

    /// The cache for `key`, created empty on first use.
    pub fn context(&mut self, key: K) -> &mut ChunkCache {
        self.caches.entry(key).or_default()
    }

    /// The cache for `key`, if one exists.
    pub fn get(&self, key: &K) -> Option<&ChunkCache> {
        self.caches.get(key)
    }

    /// Forget `key`'s cache. Its unused chunk tail is not reclaimed.
    pub fn remove(&mut self, key: &K) -> Option<ChunkCache> {
        self.caches.shift_remove(key)
    }

    /// Drop every cached chunk. Keys and claim counters are kept.
    pub fn invalidate_all(&mut self) {
        for cache in self.caches.values_mut() {
            cache.invalidate();
        }
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Whether no key is registered.
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Sum of [`ChunkCache::global_claims`] over all caches.
    pub fn total_global_claims(&self) -> u64 {
        self.caches.values().map(ChunkCache::global_claims).sum()
    }

    /// Iterate `(key, cache)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &ChunkCache)> {
        self.caches.iter()
    }
}

impl<K: Hash + Eq> Default for ChunkRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::two_level::TwoLevelArena;

    #[test]
    fn context_is_created_once_per_key() {
        let mut registry = ChunkRegistry::new();
        registry.context("rx");
        registry.context("tx");
        registry.context("rx");
        assert_eq!(registry.len(), 2);
        let keys: Vec<_> = registry.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, ["rx", "tx"]);
    }

    #[test]
    fn totals_and_invalidation() {
        let arena = TwoLevelArena::new(&ArenaConfig::new(1 << 20)).unwrap();
        let mut registry = ChunkRegistry::new();
        for key in 0..4u8 {
            let _ = arena.allocate::<u64>(registry.context(key), 1);
        }
        assert_eq!(registry.total_global_claims(), 4);
        registry.invalidate_all();
        assert!(registry.iter().all(|(_, c)| !c.has_chunk()));
        assert_eq!(registry.total_global_claims(), 4);

        let _ = arena.allocate::<u64>(registry.context(0), 1);
        assert_eq!(registry.get(&0).map(ChunkCache::global_claims), Some(2));
    }

    #[test]
    fn remove_forgets_key() {
        let mut registry: ChunkRegistry<u32> = ChunkRegistry::default();
        registry.context(7);
        assert!(registry.remove(&7).is_some());
        assert!(registry.is_empty());
        assert!(registry.get(&7).is_none());
    }
}
