//! Request coalescer / singleflight (C2)
//!
//! Collapses concurrent `Do(key, fn)` calls for the same key into one
//! in-flight future; every caller that joins while it's running gets a
//! clone of the same result. Grounded on the broadcast-fan-out shape of
//! `enterprise::tracing::invalidation::TagInvalidator` (one producer,
//! many waiters via `tokio::sync::broadcast`) and the singleflight
//! pattern in the `skp-cache` manager from the example pack.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::broadcast;

enum Slot<V> {
    InFlight(broadcast::Sender<Result<V, String>>),
}

/// Coalesces concurrent duplicate fetches for the same key so only one
/// underlying call runs at a time.
pub struct Coalescer<K, V> {
    inflight: DashMap<K, Slot<V>>,
}

impl<K, V> Coalescer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + 'static,
{
    /// Create an empty coalescer.
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Run `f` for `key`, or join an already-running call for the same
    /// key. Exactly one call to `f` runs per key at a time; all callers
    /// observe the same `Result`.
    pub async fn do_call<F, Fut>(&self, key: K, f: F) -> Result<V, String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, String>>,
    {
        // Fast path: join an in-flight call.
        let mut rx = match self.inflight.get(&key) {
            Some(entry) => match entry.value() {
                Slot::InFlight(tx) => tx.subscribe(),
            },
            None => {
                // Become the leader; insert our own broadcast slot first so
                // any racing joiner sees InFlight rather than missing it.
                let (tx, _rx) = broadcast::channel::<Result<V, String>>(1);
                match self.inflight.entry(key.clone()) {
                    dashmap::mapref::entry::Entry::Occupied(entry) => match entry.get() {
                        Slot::InFlight(existing_tx) => existing_tx.subscribe(),
                    },
                    dashmap::mapref::entry::Entry::Vacant(entry) => {
                        entry.insert(Slot::InFlight(tx.clone()));
                        let result = f().await;
                        self.inflight.remove(&key);
                        let _ = tx.send(result.clone());
                        return result;
                    }
                }
            }
        };

        rx.recv()
            .await
            .unwrap_or_else(|_| Err("coalesced call dropped before completing".to_string()))
    }

    /// Remove any in-flight registration for `key` without waiting on
    /// it, so a subsequent `Do` starts fresh. Used to bound unbounded
    /// waits (spec §4.2 "Forget").
    pub fn forget(&self, key: &K) {
        self.inflight.remove(key);
    }

    /// Number of keys with a call currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

impl<K, V> Default for Coalescer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// `broadcast::Sender<Result<V, String>>` requires `V: Clone` to implement
// `Clone` on the channel's value; callers supply cloneable cache values
// (spec's opaque `Bytes` payload satisfies this).
impl<V> Clone for Slot<V> {
    fn clone(&self) -> Self {
        match self {
            Slot::InFlight(tx) => Slot::InFlight(tx.clone()),
        }
    }
}

pub(crate) type SharedCoalescer<K, V> = Arc<Coalescer<K, V>>;
