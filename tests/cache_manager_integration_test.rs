//! End-to-end coverage of the cache manager across L1, L2, and origin,
//! exercised the way a caller outside the crate would: through
//! `CacheManager` alone, with no knowledge of the internal L1 store.

use bytes::Bytes;
use caddy_cacheplane::config::L1Config;
use caddy_cacheplane::manager::adapters::{InMemoryAuditSink, InMemoryOrigin, InMemoryRemoteCache};
use caddy_cacheplane::manager::{CacheManager, CacheTier};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn read_through_populates_every_tier_on_the_way_back() {
    let origin = Arc::new(InMemoryOrigin::new());
    origin.seed("widget:1", Bytes::from_static(b"gizmo"));
    let remote = Arc::new(InMemoryRemoteCache::new());

    let mut config = L1Config::default();
    config.l2_enabled = true;
    let manager = CacheManager::new(config, origin, Some(remote.clone()), Arc::new(InMemoryAuditSink::new()));

    let outcome = manager.get("widget:1").await.unwrap().unwrap();
    assert_eq!(outcome.tier, CacheTier::Origin);

    // Populated L1 on the way out.
    let outcome = manager.get("widget:1").await.unwrap().unwrap();
    assert_eq!(outcome.tier, CacheTier::L1);

    // And L2, independently of L1.
    let from_l2 = remote.get("widget:1").await.unwrap();
    assert_eq!(from_l2, Some(Bytes::from_static(b"gizmo")));
}

#[tokio::test]
async fn write_through_set_is_visible_without_an_origin_round_trip() {
    let origin = Arc::new(InMemoryOrigin::new());
    let remote = Arc::new(InMemoryRemoteCache::new());
    let mut config = L1Config::default();
    config.l2_enabled = true;
    let manager = CacheManager::new(config, origin, Some(remote), Arc::new(InMemoryAuditSink::new()));

    manager.set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(60))).await.unwrap();

    let outcome = manager.get("k").await.unwrap().unwrap();
    assert_eq!(outcome.tier, CacheTier::L1);
    assert_eq!(outcome.value, Bytes::from_static(b"v"));
}

#[tokio::test]
async fn delete_clears_l1_and_l2_together() {
    let origin = Arc::new(InMemoryOrigin::new());
    let remote = Arc::new(InMemoryRemoteCache::new());
    let mut config = L1Config::default();
    config.l2_enabled = true;
    let manager = CacheManager::new(config, origin, Some(remote.clone()), Arc::new(InMemoryAuditSink::new()));

    manager.set("k", Bytes::from_static(b"v"), None).await.unwrap();
    assert!(manager.delete("k").await.unwrap());

    assert_eq!(manager.size(), 0);
    assert_eq!(remote.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn ttl_sweep_drops_expired_entries_in_bulk() {
    let origin = Arc::new(InMemoryOrigin::new());
    let manager = CacheManager::new(L1Config::default(), origin, None, Arc::new(InMemoryAuditSink::new()));

    for i in 0..5 {
        manager
            .set(&format!("k{i}"), Bytes::from_static(b"v"), Some(Duration::from_millis(20)))
            .await
            .unwrap();
    }
    assert_eq!(manager.size(), 5);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let swept = manager.cleanup_expired();
    assert_eq!(swept, 5);
    assert_eq!(manager.size(), 0);
}

#[tokio::test]
async fn missing_key_falls_through_every_tier_to_none() {
    let origin = Arc::new(InMemoryOrigin::new());
    let remote = Arc::new(InMemoryRemoteCache::new());
    let mut config = L1Config::default();
    config.l2_enabled = true;
    let manager = CacheManager::new(config, origin, Some(remote), Arc::new(InMemoryAuditSink::new()));

    assert!(manager.get("does-not-exist").await.unwrap().is_none());
}
