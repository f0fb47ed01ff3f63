//! Cross-module coverage of invalidation: coordinator mutating the same
//! L1 store a `CacheManager` reads from, with pub/sub fan-out and the
//! audit trail observed from outside the crate.

use bytes::Bytes;
use caddy_cacheplane::invalidation::audit::{InvalidationReason, InvalidationTarget};
use caddy_cacheplane::invalidation::{InvalidationCoordinator, InvalidationRequest};
use caddy_cacheplane::manager::adapters::{InMemoryAuditSink, InMemoryOrigin};
use caddy_cacheplane::manager::CacheManager;
use caddy_cacheplane::pubsub::Topic;
use caddy_cacheplane::L1Config;
use std::sync::Arc;
use std::time::Duration;

fn wire() -> (Arc<CacheManager>, InvalidationCoordinator<Bytes>, Arc<Topic>, Arc<InMemoryAuditSink>) {
    let audit = Arc::new(InMemoryAuditSink::new());
    let manager = Arc::new(CacheManager::new(
        L1Config::default(),
        Arc::new(InMemoryOrigin::new()),
        None,
        audit.clone(),
    ));
    let topic = Arc::new(Topic::new());
    let coordinator = InvalidationCoordinator::new(
        manager.l1_store(),
        manager.pattern_matcher(),
        None,
        topic.clone(),
        audit.clone(),
    );
    (manager, coordinator, topic, audit)
}

/// The audit write happens off the invalidation critical path; give the
/// spawned task a chance to run before asserting on the sink.
async fn let_audit_write_settle() {
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn invalidating_a_key_is_visible_through_the_manager() {
    let (manager, coordinator, _topic, _audit) = wire();
    manager.set("session:42", Bytes::from_static(b"token"), Some(Duration::from_secs(60))).await.unwrap();

    let removed = coordinator
        .invalidate(
            InvalidationRequest::Keys(vec!["session:42".to_string()]),
            InvalidationReason::Explicit,
            Some("admin".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(removed, 1);
    assert!(manager.get("session:42").await.unwrap().is_none());
}

#[tokio::test]
async fn pattern_invalidation_leaves_non_matching_keys_readable() {
    let (manager, coordinator, _topic, _audit) = wire();
    manager.set("cart:1:items", Bytes::from_static(b"a"), None).await.unwrap();
    manager.set("cart:1:total", Bytes::from_static(b"b"), None).await.unwrap();
    manager.set("cart:2:items", Bytes::from_static(b"c"), None).await.unwrap();

    let removed = coordinator
        .invalidate(InvalidationRequest::Pattern("cart:1:*".to_string()), InvalidationReason::Cascade, None)
        .await
        .unwrap();

    assert_eq!(removed, 2);
    assert!(manager.get("cart:2:items").await.unwrap().is_some());
}

#[tokio::test]
async fn subscriber_sees_the_event_and_audit_trail_has_one_record() {
    let (manager, coordinator, topic, audit) = wire();
    manager.set("k", Bytes::from_static(b"v"), None).await.unwrap();
    let mut rx = topic.subscribe();

    coordinator
        .invalidate(InvalidationRequest::Keys(vec!["k".to_string()]), InvalidationReason::DataChanged, None)
        .await
        .unwrap();

    let event = rx.recv().await.unwrap();
    match event.target {
        InvalidationTarget::Keys(keys) => assert_eq!(keys, vec!["k".to_string()]),
        InvalidationTarget::Pattern(_) => panic!("expected a Keys target"),
    }
    let_audit_write_settle().await;
    assert_eq!(audit.records().len(), 1);
    assert_eq!(audit.records()[0].reason, InvalidationReason::DataChanged);
}

#[tokio::test]
async fn repeating_the_same_request_inside_the_dedup_window_only_audits_once() {
    let (manager, coordinator, _topic, audit) = wire();
    manager.set("k", Bytes::from_static(b"v"), None).await.unwrap();

    let first = coordinator
        .invalidate(InvalidationRequest::Keys(vec!["k".to_string()]), InvalidationReason::Explicit, None)
        .await
        .unwrap();
    let second = coordinator
        .invalidate(InvalidationRequest::Keys(vec!["k".to_string()]), InvalidationReason::Explicit, None)
        .await
        .unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 0);
    let_audit_write_settle().await;
    assert_eq!(audit.records().len(), 1);
}
