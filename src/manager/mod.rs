//! Cache manager (C4): read-through / write-through orchestration over
//! L1, the optional L2 remote cache, and the origin.
//!
//! Grounded on `enterprise::cache::strategy::ReadThroughCache`/
//! `WriteThroughCache` for the get/put shape, generalized to add an L2
//! tier and request coalescing (`crate::l1::Coalescer`) around the origin
//! fetch so a cold key hit by N concurrent callers triggers exactly one
//! origin call (spec §4.4 "exactly-once fetch under concurrency").

pub mod adapters;

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::L1Config;
use crate::error::CacheError;
use crate::l1::{Coalescer, L1Store, PatternMatcher};

use adapters::{AuditSink, OriginFetcher, RemoteCache};

/// Where a `get` was ultimately satisfied from, surfaced for metrics
/// (spec §4.4 "tag every read with its serving tier").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    L1,
    L2,
    Origin,
}

/// Result of a single `get` call.
#[derive(Debug, Clone)]
pub struct GetOutcome {
    pub value: Bytes,
    pub tier: CacheTier,
}

/// Orchestrates L1 + optional L2 + origin for a single logical cache.
pub struct CacheManager {
    l1: Arc<L1Store<String, Bytes>>,
    matcher: Arc<PatternMatcher>,
    coalescer: Coalescer<String, Bytes>,
    origin: Arc<dyn OriginFetcher>,
    remote: Option<Arc<dyn RemoteCache>>,
    audit: Arc<dyn AuditSink>,
    config: L1Config,
}

impl CacheManager {
    /// Build a manager wired to a fresh L1 store sized per `config`, the
    /// given origin fetcher, optional L2 tier, and audit sink.
    pub fn new(
        config: L1Config,
        origin: Arc<dyn OriginFetcher>,
        remote: Option<Arc<dyn RemoteCache>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            l1: Arc::new(L1Store::new(config.l1_max_entries)),
            matcher: Arc::new(PatternMatcher::new()),
            coalescer: Coalescer::new(),
            origin,
            remote,
            audit,
            config,
        }
    }

    /// Shared handle to the underlying L1 store, for wiring into the
    /// invalidation coordinator and warming engine.
    pub fn l1_store(&self) -> Arc<L1Store<String, Bytes>> {
        self.l1.clone()
    }

    /// Shared handle to the pattern matcher, for the same reason.
    pub fn pattern_matcher(&self) -> Arc<PatternMatcher> {
        self.matcher.clone()
    }

    /// Read-through get: L1, then L2 (if enabled), then a coalesced
    /// origin fetch. A successful origin fetch populates L1 and L2 on
    /// its way back out.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<GetOutcome>, CacheError> {
        if let Some(entry) = self.l1.get(&key.to_string()) {
            debug!(key, "l1 hit");
            return Ok(Some(GetOutcome {
                value: entry.value,
                tier: CacheTier::L1,
            }));
        }

        // A failed L2 read falls through to origin rather than failing
        // the caller (spec §4.4/§7 "L2 errors never become fatal").
        if self.config.l2_enabled {
            if let Some(remote) = &self.remote {
                match remote.get(key).await {
                    Ok(Some(value)) => {
                        debug!(key, "l2 hit");
                        self.l1
                            .set(key.to_string(), value.clone(), self.config.default_ttl);
                        return Ok(Some(GetOutcome {
                            value,
                            tier: CacheTier::L2,
                        }));
                    }
                    Ok(None) => {}
                    Err(e) => warn!(key, error = %e, "l2 read failed, falling through to origin"),
                }
            }
        }

        let origin = self.origin.clone();
        let key_owned = key.to_string();
        let fetched = self
            .coalescer
            .do_call(key_owned.clone(), move || async move {
                origin
                    .fetch(&key_owned)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(CacheError::Fetch)?;

        match fetched {
            Some(value) => {
                debug!(key, "origin hit");
                self.l1
                    .set(key.to_string(), value.clone(), self.config.default_ttl);
                if self.config.l2_enabled {
                    if let Some(remote) = &self.remote {
                        if let Err(e) = remote.set(key, value.clone(), self.config.default_ttl).await {
                            warn!(key, error = %e, "failed to populate l2 after origin fetch");
                        }
                    }
                }
                Ok(Some(GetOutcome {
                    value,
                    tier: CacheTier::Origin,
                }))
            }
            None => Ok(None),
        }
    }

    /// Write-through set: L1 is authoritative and is written first,
    /// unconditionally; the L2 write (if enabled) is best-effort and its
    /// failure is logged, never propagated (spec's "L1 is authoritative"
    /// write-through guarantee).
    pub async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        self.l1.set(key.to_string(), value.clone(), ttl);
        if self.config.l2_enabled {
            if let Some(remote) = &self.remote {
                if let Err(e) = remote.set(key, value, ttl).await {
                    warn!(key, error = %e, "l2 write failed after l1 write-through");
                }
            }
        }
        Ok(())
    }

    /// Delete a single key from L1 (authoritative) and best-effort from
    /// L2.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let existed = self.l1.delete(&key.to_string());
        if self.config.l2_enabled {
            if let Some(remote) = &self.remote {
                if let Err(e) = remote.delete(key).await {
                    warn!(key, error = %e, "l2 delete failed");
                }
            }
        }
        self.coalescer.forget(&key.to_string());
        Ok(existed)
    }

    /// Periodic TTL sweep; intended to run on the interval configured by
    /// [`L1Config::cleanup_interval`].
    pub fn cleanup_expired(&self) -> usize {
        self.l1.cleanup_expired()
    }

    /// Current number of live L1 entries.
    pub fn size(&self) -> usize {
        self.l1.size()
    }

    /// Hook for the invalidation coordinator / warming engine to share
    /// this manager's audit sink rather than constructing their own.
    pub fn audit_sink(&self) -> Arc<dyn AuditSink> {
        self.audit.clone()
    }
}
