//! TTL + LRU result cache.
//!
//! Generic over the key so the design is not welded to the three-horizon
//! key space, though in practice the orchestrator keys it by [`Horizon`].
//! Expiry is lazy: an entry past its TTL is evicted by the read that
//! discovers it and counted as a miss. Capacity pressure evicts the least
//! recently used key, with recency updated on every get/set hit.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use serde::Serialize;
use tracing::debug;

use crate::core::types::now_ms;

/// Fallback TTL for keys without an explicit or per-key default.
pub const DEFAULT_TTL_MS: u64 = 60_000;

/// One cached value with its freshness bookkeeping. Entries are owned
/// exclusively by the cache; values are handed out by clone.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    created_at_ms: u64,
    ttl_ms: u64,
    access_count: u64,
}

/// Read-only observability counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub sets: u64,
}

pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Strict access order, least recent at the front.
    order: VecDeque<K>,
    capacity: usize,
    default_ttl_ms: u64,
    ttl_overrides: HashMap<K, u64>,
    stats: CacheStats,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(capacity: usize, default_ttl_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            default_ttl_ms,
            ttl_overrides: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Register a per-key TTL used when `set` is called without an
    /// explicit override.
    pub fn set_ttl_for(&mut self, key: K, ttl_ms: u64) {
        self.ttl_overrides.insert(key, ttl_ms);
    }

    pub fn set(&mut self, key: K, value: V) {
        let ttl = self
            .ttl_overrides
            .get(&key)
            .copied()
            .unwrap_or(self.default_ttl_ms);
        self.set_with_ttl(key, value, ttl);
    }

    pub fn set_with_ttl(&mut self, key: K, value: V, ttl_ms: u64) {
        self.set_at(key, value, ttl_ms, now_ms())
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, now_ms())
    }

    /// Whether the key is absent or past its TTL. Does not evict.
    pub fn is_expired(&self, key: &K) -> bool {
        self.is_expired_at(key, now_ms())
    }

    pub fn delete(&mut self, key: &K) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn set_at(&mut self, key: K, value: V, ttl_ms: u64, now: u64) {
        if self.entries.contains_key(&key) {
            self.touch(&key);
        } else {
            if self.entries.len() >= self.capacity {
                self.evict_lru();
            }
            self.order.push_back(key.clone());
        }
        self.entries.insert(
            key,
            CacheEntry {
                payload: value,
                created_at_ms: now,
                ttl_ms,
                access_count: 0,
            },
        );
        self.stats.sets += 1;
    }

    fn get_at(&mut self, key: &K, now: u64) -> Option<V> {
        if self.is_expired_at(key, now) {
            if self.entries.remove(key).is_some() {
                self.order.retain(|k| k != key);
                self.stats.expirations += 1;
                debug!(?key, "cache entry expired on read");
            }
            self.stats.misses += 1;
            return None;
        }
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.access_count += 1;
                let value = entry.payload.clone();
                self.touch(key);
                self.stats.hits += 1;
                Some(value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    fn is_expired_at(&self, key: &K, now: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) => now.saturating_sub(entry.created_at_ms) > entry.ttl_ms,
            None => true,
        }
    }

    /// Move the key to the most-recent end of the access list.
    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn evict_lru(&mut self) {
        if let Some(oldest) = self.order.pop_front() {
            self.entries.remove(&oldest);
            self.stats.evictions += 1;
            debug!(key = ?oldest, "lru eviction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get_within_ttl() {
        let mut cache: TtlCache<&str, u32> = TtlCache::new(4, 1_000);
        cache.set("a", 7);
        assert_eq!(cache.get(&"a"), Some(7));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_expiry_is_lazy_and_counts_as_miss() {
        let mut cache: TtlCache<&str, u32> = TtlCache::new(4, 1_000);
        cache.set_at("a", 7, 1_000, 0);
        assert!(!cache.is_expired_at(&"a", 500));
        assert!(cache.is_expired_at(&"a", 1_001));
        // Entry still resident until a read discovers it.
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at(&"a", 1_001), None);
        assert_eq!(cache.len(), 0);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let mut cache: TtlCache<&str, u32> = TtlCache::new(2, 10_000);
        cache.set("a", 1);
        cache.set("b", 2);
        // Touch "a" so "b" becomes the LRU candidate despite being newer.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.set("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut cache: TtlCache<&str, u32> = TtlCache::new(2, 10_000);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 9);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(9));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_per_key_ttl_override() {
        let mut cache: TtlCache<&str, u32> = TtlCache::new(4, 60_000);
        cache.set_ttl_for("fast", 100);
        cache.set_at("fast", 1, 100, 0);
        cache.set_at("slow", 2, 60_000, 0);
        assert!(cache.is_expired_at(&"fast", 200));
        assert!(!cache.is_expired_at(&"slow", 200));
    }

    #[test]
    fn test_delete_and_clear() {
        let mut cache: TtlCache<&str, u32> = TtlCache::new(4, 1_000);
        cache.set("a", 1);
        cache.set("b", 2);
        assert!(cache.delete(&"a"));
        assert!(!cache.delete(&"a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
