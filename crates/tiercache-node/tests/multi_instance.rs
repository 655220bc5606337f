//! Several nodes sharing one L2, lock table and bus, each with its own L1.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{cluster_member, user};
use futures_util::future::join_all;
use tiercache_node::cache::{CachePolicy, ClusterBackends};
use tiercache_store_memory::InMemoryStore;

#[tokio::test]
async fn test_update_on_one_node_reaches_every_node() {
    let backends = ClusterBackends::memory();
    let store = Arc::new(InMemoryStore::new());
    store.seed(user(42, "v1"));

    let nodes: Vec<_> = (0..3)
        .map(|_| cluster_member(CachePolicy::default(), store.clone(), &backends))
        .collect();
    let mut listeners = Vec::new();
    for node in &nodes {
        // Rebuild job: every node starts with the ids that exist
        node.existence_filter().add(&42u64);
        listeners.push(node.start_invalidation_listener().await);
    }

    for node in &nodes {
        assert_eq!(node.get(&42).await.unwrap(), Some(user(42, "v1")));
    }
    assert_eq!(store.find_calls(), 1, "peers backfill from L2");

    nodes[0].update(&42, user(42, "v2")).await.unwrap();

    // Twice the delayed-delete window
    tokio::time::sleep(Duration::from_millis(600)).await;
    for node in &nodes {
        assert_eq!(node.get(&42).await.unwrap(), Some(user(42, "v2")));
    }

    for listener in listeners {
        listener.abort();
    }
}

#[tokio::test]
async fn test_listener_evicts_negative_companion_on_peer() {
    let backends = ClusterBackends::memory();
    let store = Arc::new(InMemoryStore::new());
    let a = cluster_member(CachePolicy::default(), store.clone(), &backends);
    let b = cluster_member(CachePolicy::default(), store.clone(), &backends);
    a.existence_filter().add(&5u64);
    b.existence_filter().add(&5u64);
    let listener = b.start_invalidation_listener().await;

    // b learns that 5 is absent and caches the marker locally
    assert_eq!(b.get(&5).await.unwrap(), None);
    assert!(b.local().get("user:null:v1:5").await.is_some());

    a.update(&5, user(5, "born")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(b.local().get("user:null:v1:5").await.is_none());
    assert_eq!(b.get(&5).await.unwrap(), Some(user(5, "born")));
    listener.abort();
}

#[tokio::test]
async fn test_concurrent_misses_across_nodes_load_once() {
    let backends = ClusterBackends::memory();
    let store = Arc::new(InMemoryStore::with_latency(Duration::from_millis(20)));
    store.seed(user(9, "nine"));

    let nodes: Vec<_> = (0..4)
        .map(|_| cluster_member(CachePolicy::default(), store.clone(), &backends))
        .collect();
    for node in &nodes {
        node.existence_filter().add(&9u64);
    }

    let reads = nodes.iter().flat_map(|node| {
        (0..5).map(move |_| {
            let node = node.clone();
            async move { node.get(&9).await }
        })
    });
    let results = join_all(reads).await;

    assert_eq!(store.find_calls(), 1);
    assert!(results.into_iter().all(|r| r.unwrap() == Some(user(9, "nine"))));
}

#[tokio::test]
async fn test_stale_key_refreshed_once_across_nodes() {
    let backends = ClusterBackends::memory();
    let store = Arc::new(InMemoryStore::with_latency(Duration::from_millis(50)));
    store.seed(user(1, "old"));
    let policy = CachePolicy {
        logical_ttl_base: Duration::from_millis(150),
        logical_ttl_jitter: Duration::ZERO,
        ..CachePolicy::default()
    };

    let a = cluster_member(policy.clone(), store.clone(), &backends);
    let b = cluster_member(policy, store.clone(), &backends);
    a.existence_filter().add(&1u64);
    b.existence_filter().add(&1u64);

    a.get(&1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(a.get(&1).await.unwrap(), Some(user(1, "old")));
    assert_eq!(b.get(&1).await.unwrap(), Some(user(1, "old")));

    a.background().wait_idle().await;
    b.background().wait_idle().await;
    assert_eq!(store.find_calls(), 2);
}

#[tokio::test]
async fn test_peer_filter_rejection_does_not_hide_fresh_write() {
    let backends = ClusterBackends::memory();
    let store = Arc::new(InMemoryStore::new());
    let a = cluster_member(CachePolicy::default(), store.clone(), &backends);
    let b = cluster_member(CachePolicy::default(), store.clone(), &backends);

    a.update(&77, user(77, "new")).await.unwrap();
    a.background().wait_idle().await;

    // b's filter has not heard of 77 yet, so it presumes absence
    assert_eq!(b.get(&77).await.unwrap(), None);
    assert_eq!(store.find_calls(), 0);

    // The writer's own filter knows better than b's presumed marker
    assert_eq!(a.get(&77).await.unwrap(), Some(user(77, "new")));
    assert_eq!(store.find_calls(), 1);
}
