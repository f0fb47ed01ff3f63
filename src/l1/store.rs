//! L1 store: a concurrent LRU cache with per-entry TTL (C1)
//!
//! The LRU ordering is delegated to the battle-tested intrusive list in
//! the `lru` crate rather than hand-rolled, so `Get`/`Set`/evict stay O(1)
//! without unsafe code in this crate. A single `parking_lot::Mutex` is the
//! one writer lock spec §4.1/§5 calls for: `Get` needs `&mut` on the
//! underlying `LruCache` anyway to promote the touched entry to MRU, so a
//! reader/writer split would buy nothing here.

use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use crate::l1::pattern::PatternMatcher;

/// A cached value plus the timestamps spec §3 requires on every entry.
///
/// `expires_at` is authoritative; `cached_at` is informational only, kept
/// for callers that want to know how fresh an entry is.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,
    /// When the entry was written.
    pub cached_at: Instant,
    /// Absolute expiry deadline. Always `> cached_at`.
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let cached_at = Instant::now();
        Self {
            value,
            cached_at,
            expires_at: cached_at + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Concurrent L1 store with LRU eviction and lazy + swept TTL expiry.
///
/// Infallible besides capacity: every operation here returns a plain
/// value, never a `Result` (spec §4.1, §7 "L1 never errors").
pub struct L1Store<K, V> {
    inner: Mutex<LruCache<K, CacheEntry<V>>>,
    max_entries: usize,
}

impl<K, V> L1Store<K, V>
where
    K: Eq + Hash + Clone + AsRef<str>,
    V: Clone,
{
    /// Create a new store with the given capacity.
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            max_entries,
        }
    }

    /// `Get(k) -> (entry, found)`. Promotes the key to MRU on hit. Lazily
    /// deletes and reports not-found if the entry is past its deadline.
    pub fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        let mut guard = self.inner.lock();
        let now = Instant::now();
        let expired = matches!(guard.peek(key), Some(e) if e.is_expired(now));
        if expired {
            guard.pop(key);
            return None;
        }
        guard.get(key).cloned()
    }

    /// `Set(k, v, ttl)`. Overwrites in place if present, else inserts at
    /// MRU, evicting the LRU-tail entry first if the store is full.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry::new(value, ttl);
        let mut guard = self.inner.lock();
        guard.put(key, entry);
    }

    /// `Delete(k) -> existed`.
    pub fn delete(&self, key: &K) -> bool {
        self.inner.lock().pop(key).is_some()
    }

    /// `DeletePattern(p) -> n`. Single pass over the map, matching keys
    /// via the shared [`PatternMatcher`] so compiled regexes are reused
    /// rather than rebuilt per call.
    pub fn delete_pattern(&self, pattern: &str, matcher: &PatternMatcher) -> usize {
        self.delete_pattern_keys(pattern, matcher).len()
    }

    /// Same as [`Self::delete_pattern`] but returns the matched keys
    /// themselves, so a caller (the invalidation coordinator) can apply
    /// the same removal set to a second tier.
    pub fn delete_pattern_keys(&self, pattern: &str, matcher: &PatternMatcher) -> Vec<K> {
        let mut guard = self.inner.lock();
        let matches: Vec<K> = guard
            .iter()
            .filter(|(k, _)| matcher.matches(pattern, k.as_ref()))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &matches {
            guard.pop(key);
        }
        matches
    }

    /// `CleanupExpired() -> n`. Bounds how long expired entries can
    /// linger between lazy-delete reads; intended to be called on a
    /// periodic background tick (see `service::CachePlaneService`).
    pub fn cleanup_expired(&self) -> usize {
        let mut guard = self.inner.lock();
        let now = Instant::now();
        let expired: Vec<K> = guard
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        let count = expired.len();
        for key in expired {
            guard.pop(&key);
        }
        count
    }

    /// Current number of live entries (including not-yet-swept expired
    /// ones, per the documented lazy-expiry race).
    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }

    /// Configured maximum entry count.
    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
