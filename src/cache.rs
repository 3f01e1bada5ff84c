//! TTL-keyed query cache with bounded, oldest-first eviction.
//!
//! Keys are deterministic hashes of (normalized query text, bound parameters,
//! limit, offset). The cache is consulted only for read-only, deterministic
//! operations — first-page filter queries in practice; that policy lives in
//! the caller ([`QueryGate`](crate::query::QueryGate)), not here.
//!
//! Expired entries are evicted lazily on access. When an insert would exceed
//! capacity, the oldest 20% of entries (by insertion order) are evicted
//! first.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

/// Fraction of capacity evicted in one bulk pass when the cache is full.
const EVICTION_FRACTION: usize = 5; // capacity / 5 == oldest 20%

/// Deterministic cache key for a query invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryKey(u64);

impl QueryKey {
    /// Build a key from query text, bound parameters, and pagination.
    ///
    /// Query text is whitespace-normalized so formatting differences do not
    /// fragment the cache. `DefaultHasher` is SipHash with fixed keys, so
    /// the result is stable for a given input.
    pub fn new(sql: &str, params: &[Value], limit: u64, offset: u64) -> Self {
        let mut hasher = DefaultHasher::new();

        let mut first = true;
        for word in sql.split_whitespace() {
            if !first {
                hasher.write_u8(b' ');
            }
            word.hash(&mut hasher);
            first = false;
        }

        for param in params {
            param.to_string().hash(&mut hasher);
        }
        limit.hash(&mut hasher);
        offset.hash(&mut hasher);

        Self(hasher.finish())
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<QueryKey, CacheEntry>,
    // Insertion order, oldest at the front.
    order: VecDeque<QueryKey>,
}

/// Hit/miss/occupancy counters for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that returned a live entry.
    pub hits: u64,
    /// Lookups that found nothing, or only an expired entry.
    pub misses: u64,
    /// Current live entry count.
    pub entries: usize,
}

/// Bounded TTL cache for query results.
///
/// Cloning shares the underlying storage. The mutex is held only for the
/// read-modify-write of the entry map.
#[derive(Debug, Clone)]
pub struct QueryCache {
    inner: Arc<Mutex<CacheInner>>,
    capacity: usize,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl QueryCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            capacity: capacity.max(1),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Look up a key, counting a hit or miss.
    ///
    /// Returns `None` if the entry is absent or its age exceeds its TTL;
    /// expired entries are removed on the way out.
    pub fn get(&self, key: &QueryKey) -> Option<Value> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        match inner.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                let value = entry.value.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.order.retain(|k| k != key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a value with the given TTL.
    ///
    /// When the cache is at capacity, the oldest 20% of entries are evicted
    /// before inserting. Re-inserting an existing key refreshes its value,
    /// TTL, and insertion-order position.
    pub fn put(&self, key: QueryKey, value: Value, ttl: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        } else if inner.entries.len() >= self.capacity {
            let evict = (self.capacity / EVICTION_FRACTION).max(1);
            for _ in 0..evict {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
        inner.order.push_back(key);
    }

    /// Drop every entry (explicit invalidation, e.g. after a write).
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.clear();
        inner.order.clear();
    }

    /// Current entry count (including not-yet-collected expired entries).
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit/miss/occupancy counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
