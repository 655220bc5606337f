//! Integration tests for the Redis-backed cluster tier.
//!
//! Tests use testcontainers to spin up a real Redis instance and are ignored
//! by default; run them with `cargo test -- --ignored` where Docker is
//! available.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{cluster_member, user};
use futures_util::StreamExt;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tiercache_node::cache::{CacheEnvelope, CachePolicy, InvalidationBus, LockService, SharedCache};
use tiercache_node::{RedisConfig, User, create_cluster_backends};
use tiercache_store_memory::InMemoryStore;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn redis_config() -> RedisConfig {
    RedisConfig {
        enabled: true,
        url: get_redis_url().await,
        pool_size: 5,
        timeout_ms: 5000,
    }
}

#[tokio::test]
async fn test_unreachable_redis_falls_back_to_memory() {
    let config = RedisConfig {
        enabled: true,
        url: "redis://127.0.0.1:1".to_string(),
        pool_size: 1,
        timeout_ms: 500,
    };

    let backends = create_cluster_backends(&config).await;
    assert_eq!(backends.mode(), "memory");
}

#[tokio::test]
async fn test_disabled_redis_uses_memory() {
    let backends = create_cluster_backends(&RedisConfig::default()).await;
    assert_eq!(backends.mode(), "memory");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_shared_tier_get_set_delete() {
    let backends = create_cluster_backends(&redis_config().await).await;
    assert_eq!(backends.mode(), "redis");

    let envelope = CacheEnvelope::positive(user(1, "redis"), Duration::from_secs(60));
    backends
        .shared
        .set("it:shared:v1:1", envelope.encode().unwrap(), Duration::from_secs(120))
        .await
        .unwrap();

    let bytes = backends.shared.get("it:shared:v1:1").await.unwrap().expect("stored");
    let decoded: CacheEnvelope<User> = CacheEnvelope::decode(&bytes).unwrap();
    assert_eq!(decoded.data(), Some(&user(1, "redis")));

    backends
        .shared
        .delete(&["it:shared:v1:1".to_string(), "it:shared:null:v1:1".to_string()])
        .await
        .unwrap();
    assert!(backends.shared.get("it:shared:v1:1").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_lock_release_requires_owner_token() {
    let backends = create_cluster_backends(&redis_config().await).await;
    let locks = &backends.locks;

    let old = locks
        .try_acquire("it:lock", Duration::from_millis(100))
        .await
        .unwrap()
        .expect("first acquire");
    assert!(
        locks
            .try_acquire("it:lock", Duration::from_millis(100))
            .await
            .unwrap()
            .is_none()
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    let new = locks
        .try_acquire("it:lock", Duration::from_secs(5))
        .await
        .unwrap()
        .expect("re-acquire after expiry");

    // The expired owner's release must not free the new owner's lock
    locks.release("it:lock", &old).await.unwrap();
    assert!(
        locks
            .try_acquire("it:lock", Duration::from_secs(5))
            .await
            .unwrap()
            .is_none()
    );

    locks.release("it:lock", &new).await.unwrap();
    assert!(
        locks
            .try_acquire("it:lock", Duration::from_secs(5))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_bus_delivers_keys() {
    let backends = create_cluster_backends(&redis_config().await).await;

    let mut stream = backends.bus.subscribe().await.unwrap();
    backends.bus.publish("user:v1:77").await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("message within timeout");
    assert_eq!(received.as_deref(), Some("user:v1:77"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_update_invalidates_peer_l1() {
    let config = redis_config().await;
    let store = Arc::new(InMemoryStore::new());
    store.seed(user(4242, "v1"));

    let backends_a = create_cluster_backends(&config).await;
    let backends_b = create_cluster_backends(&config).await;
    let a = cluster_member(CachePolicy::default(), store.clone(), &backends_a);
    let b = cluster_member(CachePolicy::default(), store.clone(), &backends_b);
    a.existence_filter().add(&4242u64);
    b.existence_filter().add(&4242u64);
    let listener = b.start_invalidation_listener().await;

    assert_eq!(a.get(&4242).await.unwrap(), Some(user(4242, "v1")));
    assert_eq!(b.get(&4242).await.unwrap(), Some(user(4242, "v1")));
    assert_eq!(store.find_calls(), 1);

    a.update(&4242, user(4242, "v2")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(b.get(&4242).await.unwrap(), Some(user(4242, "v2")));
    listener.abort();
}
