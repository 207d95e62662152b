//! Module: db::cache::chunked
//! Responsibility: bounded key/value cache split into independently evictable partitions.
//! Does not own: what is cached or when entries become invalid.
//! Boundary: a missing partition is always just a miss.
//!
//! Partition count is the smallest prime not below the ceiling square root
//! of the capacity, so one large cache becomes ~√N small LRU chunks. Memory
//! pressure drops whole cold chunks (`reclaim_coldest`) instead of the whole
//! cache; each chunk locks on its own.

use entiq_utils::{ceiling_prime, route_hash};
use lru::LruCache;
use parking_lot::Mutex;
use std::{
    hash::Hash,
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
};

/// Capacities below this are rounded up.
pub const MIN_SIZE: usize = 16;

/// Number of partitions used for a cache of `cache_size` entries.
#[must_use]
pub const fn compute_number_of_chunks(cache_size: usize) -> usize {
    let size = if cache_size < MIN_SIZE {
        MIN_SIZE
    } else {
        cache_size
    };

    // `isqrt(size)^2 <= size`, so squaring the floor root cannot overflow.
    let mut root = size.isqrt();
    if root * root < size {
        root += 1;
    }

    ceiling_prime(root)
}

///
/// Chunk
///

struct Chunk<K, V> {
    inner: Mutex<Option<LruCache<K, V>>>,
    last_touch: AtomicU64,
}

impl<K, V> Chunk<K, V> {
    const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
            last_touch: AtomicU64::new(0),
        }
    }
}

///
/// ChunkedCache
///

pub struct ChunkedCache<K, V> {
    chunks: Box<[Chunk<K, V>]>,
    chunk_size: NonZeroUsize,
    attempts: AtomicU64,
    hits: AtomicU64,
    clock: AtomicU64,
}

impl<K, V> ChunkedCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    #[must_use]
    pub fn new(cache_size: usize) -> Self {
        let size = cache_size.max(MIN_SIZE);
        let chunk_count = compute_number_of_chunks(size);
        let chunk_size = NonZeroUsize::new(size / chunk_count).unwrap_or(NonZeroUsize::MIN);

        Self {
            chunks: (0..chunk_count).map(|_| Chunk::new()).collect(),
            chunk_size,
            attempts: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            clock: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    /// Number of partitions currently holding an inner cache.
    #[must_use]
    pub fn resident_partitions(&self) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| chunk.inner.lock().is_some())
            .count()
    }

    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let attempts = self.attempts();
        if attempts == 0 {
            0.0
        } else {
            self.hits() as f64 / attempts as f64
        }
    }

    /// Counted lookup: records one attempt, and one hit if found.
    pub fn try_key(&self, key: &K) -> Option<V> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let result = self.get(key);
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    /// Uncounted lookup.
    pub fn get(&self, key: &K) -> Option<V> {
        let chunk = self.chunk_for(key);
        let mut inner = chunk.inner.lock();

        inner.as_mut().and_then(|cache| cache.get(key).cloned())
    }

    /// Insert or replace; returns the previous value for `key`, if any.
    pub fn cache(&self, key: K, value: V) -> Option<V> {
        let chunk = self.chunk_for(&key);
        let mut inner = chunk.inner.lock();

        inner
            .get_or_insert_with(|| LruCache::new(self.chunk_size))
            .put(key, value)
    }

    /// Insert only if `admit` approves, decided under the partition lock.
    pub fn cache_if(&self, key: K, value: V, admit: impl FnOnce(Option<&V>) -> bool) -> bool {
        let chunk = self.chunk_for(&key);
        let mut inner = chunk.inner.lock();

        let existing = inner.as_ref().and_then(|cache| cache.peek(&key));
        if !admit(existing) {
            return false;
        }
        inner
            .get_or_insert_with(|| LruCache::new(self.chunk_size))
            .put(key, value);

        true
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let chunk = self.chunk_for(key);
        let mut inner = chunk.inner.lock();

        inner.as_mut().and_then(|cache| cache.pop(key))
    }

    /// Number of resident entries across all partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks
            .iter()
            .map(|chunk| chunk.inner.lock().as_ref().map_or(0, LruCache::len))
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every resident entry without touching recency.
    pub fn for_each(&self, mut visit: impl FnMut(&K, &V)) {
        for chunk in &*self.chunks {
            let inner = chunk.inner.lock();
            if let Some(cache) = inner.as_ref() {
                for (key, value) in cache {
                    visit(key, value);
                }
            }
        }
    }

    /// Visit every resident entry; entries for which `keep` returns false are
    /// removed. Each partition is locked only while it is visited.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let mut removed = 0;
        for chunk in &*self.chunks {
            let mut inner = chunk.inner.lock();
            let Some(cache) = inner.as_mut() else {
                continue;
            };

            let doomed: Vec<K> = cache
                .iter()
                .filter(|&(key, value)| !keep(key, value))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &doomed {
                cache.pop(key);
            }
            removed += doomed.len();
        }

        removed
    }

    /// Drop every partition and reset the counters.
    pub fn clear(&self) {
        for chunk in &*self.chunks {
            *chunk.inner.lock() = None;
        }
        self.attempts.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
    }

    /// Drop up to `count` resident partitions, least recently touched first.
    /// Returns how many were dropped.
    pub fn reclaim_coldest(&self, count: usize) -> usize {
        let mut resident: Vec<(u64, usize)> = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| chunk.inner.lock().is_some())
            .map(|(index, chunk)| (chunk.last_touch.load(Ordering::Relaxed), index))
            .collect();
        resident.sort_unstable();

        let mut reclaimed = 0;
        for (_, index) in resident.into_iter().take(count) {
            if self.chunks[index].inner.lock().take().is_some() {
                reclaimed += 1;
            }
        }

        reclaimed
    }

    fn chunk_for(&self, key: &K) -> &Chunk<K, V> {
        let len = self.chunks.len() as u64;
        #[expect(clippy::cast_possible_truncation)]
        let index = (route_hash(key) % len) as usize;
        let chunk = &self.chunks[index];
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        chunk.last_touch.store(tick, Ordering::Relaxed);

        chunk
    }
}
