//! Inference Result Cache
//!
//! Bounded LRU cache for inference results (embeddings, detections) keyed by
//! a caller-computed identity such as an image fingerprint. The cache never
//! looks at raw inputs itself.
//!
//! Recency is tracked with an index-linked list threaded through the entry
//! slab, so `get`, `set` and eviction are all O(1).

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// LRU cache with a fixed maximum number of entries
///
/// Not synchronized; wrap it in `SharedInferenceCache` to share it between
/// threads.
pub struct InferenceCache<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Slot<K, V>>,
    /// Least recently used
    head: Option<usize>,
    /// Most recently used
    tail: Option<usize>,
    max_size: usize,
    stats: CacheStats,
}

impl<K, V> InferenceCache<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(max_size: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::must_be_positive("max_size"));
        }

        Ok(Self {
            index: HashMap::with_capacity(max_size),
            slots: Vec::new(),
            head: None,
            tail: None,
            max_size,
            stats: CacheStats::default(),
        })
    }

    /// Look up `key`, marking it most recently used on a hit
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.index.get(key).copied() {
            Some(idx) => {
                self.stats.hits += 1;
                self.touch(idx);
                Some(&self.slots[idx].value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite `key`, evicting the least recently used entry
    /// when a new key arrives at capacity
    pub fn set(&mut self, key: K, value: V) {
        if let Some(idx) = self.index.get(&key).copied() {
            self.stats.insertions += 1;
            self.slots[idx].value = value;
            self.touch(idx);
            return;
        }
        self.insert_new(key, value);
    }

    /// Return the cached value for `key`, computing and storing it on a miss
    pub fn get_or_insert_with<F>(&mut self, key: K, compute: F) -> &V
    where
        F: FnOnce() -> V,
    {
        let idx = match self.index.get(&key).copied() {
            Some(idx) => {
                self.stats.hits += 1;
                self.touch(idx);
                idx
            }
            None => {
                self.stats.misses += 1;
                self.insert_new(key, compute())
            }
        };
        &self.slots[idx].value
    }

    /// Check for `key` without changing its recency
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Drop every entry; capacity is unchanged
    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.head = None;
        self.tail = None;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Keys from least to most recently used
    #[cfg(test)]
    pub(crate) fn keys_by_recency(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.slots.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            keys.push(self.slots[idx].key.clone());
            cursor = self.slots[idx].next;
        }
        keys
    }

    /// Insert a key known to be absent; returns its slot
    fn insert_new(&mut self, key: K, value: V) -> usize {
        self.stats.insertions += 1;
        let full = self.slots.len() >= self.max_size;

        let idx = match self.head {
            // Full: reuse the LRU slot for the new entry
            Some(lru) if full => {
                self.unlink(lru);
                let slot = &mut self.slots[lru];
                self.index.remove(&slot.key);
                slot.key = key.clone();
                slot.value = value;
                self.stats.evictions += 1;
                debug!("Evicted least recently used cache entry (slot {})", lru);
                lru
            }
            _ => {
                self.slots.push(Slot {
                    key: key.clone(),
                    value,
                    prev: None,
                    next: None,
                });
                self.slots.len() - 1
            }
        };

        self.index.insert(key, idx);
        self.push_back(idx);
        idx
    }

    fn touch(&mut self, idx: usize) {
        if self.tail != Some(idx) {
            self.unlink(idx);
            self.push_back(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = &self.slots[idx];
            (slot.prev, slot.next)
        };

        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }

        let slot = &mut self.slots[idx];
        slot.prev = None;
        slot.next = None;
    }

    fn push_back(&mut self, idx: usize) {
        self.slots[idx].prev = self.tail;
        self.slots[idx].next = None;
        match self.tail {
            Some(t) => self.slots[t].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }
}

/// Thread-safe handle to an `InferenceCache`
pub struct SharedInferenceCache<K, V> {
    inner: Arc<Mutex<InferenceCache<K, V>>>,
}

impl<K, V> Clone for SharedInferenceCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> SharedInferenceCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(max_size: usize) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(InferenceCache::new(max_size)?)),
        })
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().get(key).cloned()
    }

    pub fn set(&self, key: K, value: V) {
        self.inner.lock().set(key, value);
    }

    /// Computes under the lock, so concurrent misses on one key compute once.
    /// The lock is held for the whole computation: a miss on any key blocks
    /// every other caller of this cache until it finishes.
    pub fn get_or_insert_with<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        self.inner.lock().get_or_insert_with(key, compute).clone()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(matches!(
            InferenceCache::<u64, String>::new(0),
            Err(Error::InvalidConfig { field: "max_size", .. })
        ));
    }

    #[test]
    fn test_set_then_get() {
        let mut cache = InferenceCache::new(4).unwrap();
        cache.set("face-1".to_string(), vec![0.1f32, 0.2]);
        assert_eq!(cache.get("face-1"), Some(&vec![0.1, 0.2]));
        assert_eq!(cache.get("face-2"), None);
    }

    #[test]
    fn test_evicts_first_inserted() {
        let mut cache = InferenceCache::new(3).unwrap();
        cache.set(1, 'a');
        cache.set(2, 'b');
        cache.set(3, 'c');
        cache.set(4, 'd');

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(&'b'));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_promotes_to_most_recent() {
        let mut cache = InferenceCache::new(2).unwrap();
        cache.set("a", 1);
        cache.set("b", 2);
        assert_eq!(cache.get("a"), Some(&1));
        cache.set("c", 3);

        assert!(!cache.contains("b"));
        assert_eq!(cache.get("a"), Some(&1));
        assert_eq!(cache.get("c"), Some(&3));
    }

    #[test]
    fn test_overwrite_replaces_value_and_promotes() {
        let mut cache = InferenceCache::new(2).unwrap();
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);
        assert_eq!(cache.len(), 2);

        cache.set("c", 3);
        assert!(!cache.contains("b"));
        assert_eq!(cache.get("a"), Some(&10));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_recency_order() {
        let mut cache = InferenceCache::new(4).unwrap();
        for k in 1..=4 {
            cache.set(k, k * 10);
        }
        cache.get(&2);
        cache.get(&1);
        cache.set(3, 33);
        assert_eq!(cache.keys_by_recency(), vec![4, 2, 1, 3]);

        cache.set(5, 50);
        assert_eq!(cache.keys_by_recency(), vec![2, 1, 3, 5]);
    }

    #[test]
    fn test_contains_does_not_promote() {
        let mut cache = InferenceCache::new(2).unwrap();
        cache.set(1, ());
        cache.set(2, ());
        assert!(cache.contains(&1));
        cache.set(3, ());
        assert!(!cache.contains(&1));
    }

    #[test]
    fn test_clear_then_refill() {
        let mut cache = InferenceCache::new(3).unwrap();
        cache.set(1, 'a');
        cache.set(2, 'b');
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.capacity(), 3);

        for k in 10..13 {
            cache.set(k, 'z');
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 0);
        cache.set(13, 'y');
        assert_eq!(cache.keys_by_recency(), vec![11, 12, 13]);
    }

    #[test]
    fn test_capacity_one() {
        let mut cache = InferenceCache::new(1).unwrap();
        cache.set(1, 'a');
        cache.set(2, 'b');
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(&'b'));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_or_insert_with_computes_once() {
        let mut cache = InferenceCache::new(2).unwrap();
        let mut calls = 0;

        for _ in 0..3 {
            let value = *cache.get_or_insert_with(7u64, || {
                calls += 1;
                49
            });
            assert_eq!(value, 49);
        }

        assert_eq!(calls, 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (2, 1));
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_get_or_insert_with_evicts_at_capacity() {
        let mut cache = InferenceCache::new(2).unwrap();
        cache.set(1, 1);
        cache.set(2, 2);
        assert_eq!(*cache.get_or_insert_with(3, || 3), 3);
        assert_eq!(cache.keys_by_recency(), vec![2, 3]);
    }

    #[test]
    fn test_shared_get_or_insert_with_computes_once_under_contention() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let cache = SharedInferenceCache::new(8).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                thread::spawn(move || {
                    cache.get_or_insert_with("face-7", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(20));
                        vec![0.7f32]
                    })
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![0.7]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_shared_cache_across_threads() {
        let cache = SharedInferenceCache::new(64).unwrap();

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..16u64 {
                        cache.set(t * 16 + i, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 64);
        assert_eq!(cache.get(&17), Some(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
