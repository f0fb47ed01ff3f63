//! Invalidation coordinator (C5)
//!
//! Deduplicates concurrent identical invalidation requests, deletes the
//! matching keys from the local L1 store, records an audit entry, and
//! fans the event out over the shared [`crate::pubsub::Topic`]. Grounded
//! on `enterprise::cache::invalidation::PatternInvalidator::invalidate_pattern`
//! for the match-then-remove shape and on `TagInvalidator`'s
//! broadcast-after-mutate ordering.

pub mod audit;

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

use crate::error::InvalidationError;
use crate::l1::{L1Store, PatternMatcher};
use crate::manager::adapters::{AuditSink, RemoteCache};
use crate::pubsub::{InvalidationEvent, Topic};

use audit::{InvalidationRecord, InvalidationReason, InvalidationTarget};

/// Caller-supplied invalidation request.
#[derive(Debug, Clone)]
pub enum InvalidationRequest {
    /// Invalidate a fixed set of keys.
    Keys(Vec<String>),
    /// Invalidate every key matching a pattern (spec §4.3 classes).
    Pattern(String),
}

/// How long a request's dedup fingerprint is remembered. Two identical
/// requests within this window are treated as one (spec §4.5 "duplicate
/// suppression").
const DEDUP_WINDOW: Duration = Duration::from_secs(5);

/// Coordinates cache invalidation across the L1 store, the best-effort L2
/// tier, the audit trail, and pub/sub fan-out.
pub struct InvalidationCoordinator<V> {
    store: Arc<L1Store<String, V>>,
    matcher: Arc<PatternMatcher>,
    remote: Option<Arc<dyn RemoteCache>>,
    topic: Arc<Topic>,
    audit: Arc<dyn AuditSink>,
    seen: DashMap<String, Instant>,
    audit_errors: Arc<AtomicU64>,
}

impl<V> InvalidationCoordinator<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Build a coordinator over a shared L1 store, pattern matcher, and
    /// pub/sub topic, delivering every processed request to `audit` and
    /// best-effort deleting from `remote` (L2) when configured.
    pub fn new(
        store: Arc<L1Store<String, V>>,
        matcher: Arc<PatternMatcher>,
        remote: Option<Arc<dyn RemoteCache>>,
        topic: Arc<Topic>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            matcher,
            remote,
            topic,
            audit,
            seen: DashMap::new(),
            audit_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of audit-write failures observed so far (spec §7
    /// "audit-write error ... counted").
    pub fn audit_errors(&self) -> u64 {
        self.audit_errors.load(Ordering::Relaxed)
    }

    /// Process an invalidation request: validate, dedup, apply to L1,
    /// best-effort apply to L2, audit, and publish. Returns the number of
    /// keys actually removed from L1.
    pub async fn invalidate(
        &self,
        request: InvalidationRequest,
        reason: InvalidationReason,
        source: Option<String>,
    ) -> Result<usize, InvalidationError> {
        let fingerprint = Self::fingerprint(&request)?;
        if self.is_duplicate(&fingerprint) {
            return Ok(0);
        }

        let (target, removed, l2_keys) = match &request {
            InvalidationRequest::Keys(keys) => {
                let mut removed = 0;
                for key in keys {
                    if self.store.delete(key) {
                        removed += 1;
                    }
                }
                (InvalidationTarget::Keys(keys.clone()), removed, keys.clone())
            }
            InvalidationRequest::Pattern(pattern) => {
                self.matcher
                    .validate(pattern)
                    .map_err(|e| InvalidationError::Validation(e.to_string()))?;
                let matched = self.store.delete_pattern_keys(pattern, &self.matcher);
                let removed = matched.len();
                (InvalidationTarget::Pattern(pattern.clone()), removed, matched)
            }
        };

        // Best-effort L2 delete (spec §4.4 "best-effort delete from L2");
        // failures are logged and never fail the request.
        if let Some(remote) = &self.remote {
            for key in &l2_keys {
                if let Err(e) = remote.delete(key).await {
                    warn!(key, error = %e, "l2 best-effort delete failed");
                }
            }
        }

        let request_id = Uuid::new_v4();
        let record = InvalidationRecord {
            request_id,
            target: target.clone(),
            reason,
            keys_removed: removed,
            occurred_at: Utc::now(),
            source,
        };

        // Audit-write happens off the critical path (spec §4.5
        // "asynchronously persist an audit record"); a failure is
        // counted, never returned to the caller.
        let audit = self.audit.clone();
        let audit_errors = self.audit_errors.clone();
        tokio::spawn(async move {
            if let Err(e) = audit.record(record).await {
                audit_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "invalidation audit write failed");
            }
        });

        self.topic.publish(InvalidationEvent {
            request_id,
            target,
            reason,
        });

        Ok(removed)
    }

    fn fingerprint(request: &InvalidationRequest) -> Result<String, InvalidationError> {
        match request {
            InvalidationRequest::Keys(keys) if keys.is_empty() => {
                Err(InvalidationError::Validation("no keys given".to_string()))
            }
            InvalidationRequest::Keys(keys) => {
                let mut sorted = keys.clone();
                sorted.sort();
                Ok(format!("keys:{}", sorted.join(",")))
            }
            InvalidationRequest::Pattern(pattern) if pattern.is_empty() => {
                Err(InvalidationError::Validation("empty pattern".to_string()))
            }
            InvalidationRequest::Pattern(pattern) => Ok(format!("pattern:{pattern}")),
        }
    }

    fn is_duplicate(&self, fingerprint: &str) -> bool {
        let now = Instant::now();
        self.seen.retain(|_, seen_at| now.duration_since(*seen_at) < DEDUP_WINDOW);
        if self.seen.contains_key(fingerprint) {
            return true;
        }
        self.seen.insert(fingerprint.to_string(), now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::adapters::{FailingAuditSink, InMemoryAuditSink, InMemoryRemoteCache};

    fn harness() -> (
        Arc<L1Store<String, String>>,
        InvalidationCoordinator<String>,
        Arc<InMemoryAuditSink>,
        Arc<Topic>,
    ) {
        let store = Arc::new(L1Store::new(100));
        let matcher = Arc::new(PatternMatcher::new());
        let topic = Arc::new(Topic::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let coordinator = InvalidationCoordinator::new(
            store.clone(),
            matcher,
            None,
            topic.clone(),
            audit.clone(),
        );
        (store, coordinator, audit, topic)
    }

    #[tokio::test]
    async fn invalidate_keys_removes_from_store_and_audits() {
        let (store, coordinator, audit, _topic) = harness();
        store.set("a".into(), "1".into(), Duration::from_secs(60));
        store.set("b".into(), "2".into(), Duration::from_secs(60));

        let removed = coordinator
            .invalidate(
                InvalidationRequest::Keys(vec!["a".to_string()]),
                InvalidationReason::Explicit,
                Some("test".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(store.get(&"a".to_string()).is_none());
        assert!(store.get(&"b".to_string()).is_some());
        assert_eq!(audit.records().len(), 1);
    }

    #[tokio::test]
    async fn invalidate_pattern_removes_matches() {
        let (store, coordinator, _audit, _topic) = harness();
        store.set("user:1:a".into(), "x".into(), Duration::from_secs(60));
        store.set("user:1:b".into(), "y".into(), Duration::from_secs(60));
        store.set("user:2:a".into(), "z".into(), Duration::from_secs(60));

        let removed = coordinator
            .invalidate(
                InvalidationRequest::Pattern("user:1:*".to_string()),
                InvalidationReason::Policy,
                None,
            )
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert!(store.get(&"user:2:a".to_string()).is_some());
    }

    #[tokio::test]
    async fn duplicate_requests_within_window_are_suppressed() {
        let (store, coordinator, audit, _topic) = harness();
        store.set("a".into(), "1".into(), Duration::from_secs(60));

        let first = coordinator
            .invalidate(
                InvalidationRequest::Keys(vec!["a".to_string()]),
                InvalidationReason::Explicit,
                None,
            )
            .await
            .unwrap();
        let second = coordinator
            .invalidate(
                InvalidationRequest::Keys(vec!["a".to_string()]),
                InvalidationReason::Explicit,
                None,
            )
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(audit.records().len(), 1);
    }

    #[tokio::test]
    async fn empty_keys_request_is_rejected() {
        let (_store, coordinator, _audit, _topic) = harness();
        let result = coordinator
            .invalidate(
                InvalidationRequest::Keys(vec![]),
                InvalidationReason::Explicit,
                None,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn subscribers_observe_published_event() {
        let (store, coordinator, _audit, topic) = harness();
        store.set("a".into(), "1".into(), Duration::from_secs(60));
        let mut rx = topic.subscribe();

        coordinator
            .invalidate(
                InvalidationRequest::Keys(vec!["a".to_string()]),
                InvalidationReason::Explicit,
                None,
            )
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        match event.target {
            InvalidationTarget::Keys(keys) => assert_eq!(keys, vec!["a".to_string()]),
            _ => panic!("expected Keys target"),
        }
    }

    #[tokio::test]
    async fn invalidate_keys_best_effort_deletes_from_l2() {
        let store = Arc::new(L1Store::new(100));
        let matcher = Arc::new(PatternMatcher::new());
        let topic = Arc::new(Topic::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let remote = Arc::new(InMemoryRemoteCache::new());
        store.set("a".into(), "1".into(), Duration::from_secs(60));
        remote
            .set("a", "1".into(), Duration::from_secs(60))
            .await
            .unwrap();

        let coordinator =
            InvalidationCoordinator::new(store.clone(), matcher, Some(remote.clone()), topic, audit);

        coordinator
            .invalidate(
                InvalidationRequest::Keys(vec!["a".to_string()]),
                InvalidationReason::Explicit,
                None,
            )
            .await
            .unwrap();

        assert!(remote.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidate_pattern_best_effort_deletes_matched_keys_from_l2() {
        let store = Arc::new(L1Store::new(100));
        let matcher = Arc::new(PatternMatcher::new());
        let topic = Arc::new(Topic::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let remote = Arc::new(InMemoryRemoteCache::new());
        store.set("user:1:a".into(), "x".into(), Duration::from_secs(60));
        store.set("user:1:b".into(), "y".into(), Duration::from_secs(60));
        remote
            .set("user:1:a", "x".into(), Duration::from_secs(60))
            .await
            .unwrap();
        remote
            .set("user:1:b", "y".into(), Duration::from_secs(60))
            .await
            .unwrap();

        let coordinator =
            InvalidationCoordinator::new(store.clone(), matcher, Some(remote.clone()), topic, audit);

        coordinator
            .invalidate(
                InvalidationRequest::Pattern("user:1:*".to_string()),
                InvalidationReason::Policy,
                None,
            )
            .await
            .unwrap();

        assert!(remote.get("user:1:a").await.unwrap().is_none());
        assert!(remote.get("user:1:b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_audit_sink_is_counted_not_propagated() {
        let store = Arc::new(L1Store::new(100));
        let matcher = Arc::new(PatternMatcher::new());
        let topic = Arc::new(Topic::new());
        let audit = Arc::new(FailingAuditSink);
        store.set("a".into(), "1".into(), Duration::from_secs(60));

        let coordinator = InvalidationCoordinator::new(store, matcher, None, topic, audit);

        let result = coordinator
            .invalidate(
                InvalidationRequest::Keys(vec!["a".to_string()]),
                InvalidationReason::Explicit,
                None,
            )
            .await;
        assert!(result.is_ok());

        // the audit write is spawned off the critical path; give the
        // executor a chance to run it before asserting the counter.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.audit_errors(), 1);
    }
}
