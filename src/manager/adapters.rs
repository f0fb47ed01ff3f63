//! External boundary traits for the cache manager
//!
//! Grounded on `enterprise::cache::strategy::BackingStore` / `InMemoryStore`:
//! the manager talks to the outside world only through trait objects, never
//! through a concrete backend, so callers can plug in whatever origin
//! service, remote cache, and audit destination their deployment needs.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::time::Duration;

use crate::error::{CacheError, InvalidationError};
use crate::invalidation::audit::InvalidationRecord;

/// Fetches a value from the system of record when L1 and L2 both miss.
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// Fetch the current value for `key`, or `Ok(None)` if it genuinely
    /// does not exist upstream.
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>, CacheError>;
}

/// Optional L2 tier consulted between L1 and the origin.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Read a value, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Write a value with the given TTL.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a value.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Receives a record of every invalidation for external audit trails.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one invalidation event. The invalidation coordinator never
    /// lets an `Err` here fail the caller's request — it only counts it
    /// (spec §7 "audit-write error is swallowed and counted").
    async fn record(&self, record: InvalidationRecord) -> Result<(), InvalidationError>;
}

/// In-memory [`OriginFetcher`] for tests: serves from a fixed map, with an
/// optional artificial delay to exercise coalescing and timeout paths.
pub struct InMemoryOrigin {
    data: DashMap<String, Bytes>,
    delay: Option<Duration>,
}

impl InMemoryOrigin {
    /// An origin with no artificial latency.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            delay: None,
        }
    }

    /// An origin that sleeps `delay` before answering every fetch.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            data: DashMap::new(),
            delay: Some(delay),
        }
    }

    /// Seed a key/value pair as if it already existed upstream.
    pub fn seed(&self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.data.insert(key.into(), value.into());
    }
}

impl Default for InMemoryOrigin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OriginFetcher for InMemoryOrigin {
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.data.get(key).map(|v| v.clone()))
    }
}

/// In-memory [`RemoteCache`] for tests.
pub struct InMemoryRemoteCache {
    data: DashMap<String, (Bytes, std::time::Instant)>,
}

impl InMemoryRemoteCache {
    /// An empty remote cache.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }
}

impl Default for InMemoryRemoteCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteCache for InMemoryRemoteCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        match self.data.get(key) {
            Some(entry) if entry.1 > std::time::Instant::now() => Ok(Some(entry.0.clone())),
            Some(_) => {
                self.data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        self.data
            .insert(key.to_string(), (value, std::time::Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.data.remove(key);
        Ok(())
    }
}

/// In-memory [`AuditSink`] for tests: appends records to a `Vec` behind a
/// lock so assertions can inspect what was recorded.
pub struct InMemoryAuditSink {
    records: parking_lot::Mutex<Vec<InvalidationRecord>>,
}

impl InMemoryAuditSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self {
            records: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of every record recorded so far.
    pub fn records(&self) -> Vec<InvalidationRecord> {
        self.records.lock().clone()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: InvalidationRecord) -> Result<(), InvalidationError> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// [`AuditSink`] that always fails, for exercising the coordinator's
/// audit-error counting path without a real storage failure.
pub struct FailingAuditSink;

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn record(&self, _record: InvalidationRecord) -> Result<(), InvalidationError> {
        Err(InvalidationError::AuditWrite("sink unavailable".to_string()))
    }
}
