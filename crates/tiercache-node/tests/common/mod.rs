//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tiercache_node::User;
use tiercache_node::cache::{
    CacheError, CacheOrchestrator, CachePolicy, CacheResult, ClusterBackends, ExistenceFilter,
    InvalidationBus, KeyStream, LockService, LockToken, MemoryInvalidationBus, MemoryLockService,
    MemorySharedCache, SharedCache,
};
use tiercache_store::{DynStore, StoreError, SystemOfRecord};
use tiercache_store_memory::InMemoryStore;

/// Bus that remembers every publish and when it happened.
#[derive(Clone, Default)]
pub struct RecordingBus {
    inner: MemoryInvalidationBus,
    published: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, Instant)> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_keys(&self) -> Vec<String> {
        self.published().into_iter().map(|(key, _)| key).collect()
    }
}

#[async_trait]
impl InvalidationBus for RecordingBus {
    async fn publish(&self, key: &str) -> CacheResult<()> {
        self.published
            .lock()
            .unwrap()
            .push((key.to_string(), Instant::now()));
        self.inner.publish(key).await
    }

    async fn subscribe(&self) -> CacheResult<KeyStream> {
        self.inner.subscribe().await
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

/// Shared tier whose every call fails, as if Redis were down.
pub struct UnreachableShared;

#[async_trait]
impl SharedCache for UnreachableShared {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Err(CacheError::Command("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Command("connection refused".into()))
    }

    async fn delete(&self, _keys: &[String]) -> CacheResult<()> {
        Err(CacheError::Command("connection refused".into()))
    }

    fn backend_name(&self) -> &'static str {
        "unreachable"
    }
}

/// Lock service whose every call fails.
pub struct UnreachableLocks;

#[async_trait]
impl LockService for UnreachableLocks {
    async fn try_acquire(&self, _key: &str, _ttl: Duration) -> CacheResult<Option<LockToken>> {
        Err(CacheError::Pool("timed out waiting for connection".into()))
    }

    async fn release(&self, _key: &str, _token: &LockToken) -> CacheResult<()> {
        Err(CacheError::Pool("timed out waiting for connection".into()))
    }

    fn backend_name(&self) -> &'static str {
        "unreachable"
    }
}

/// System of record that is down.
pub struct BrokenStore;

#[async_trait]
impl SystemOfRecord<User> for BrokenStore {
    async fn find(&self, _id: &u64) -> Result<Option<User>, StoreError> {
        Err(StoreError::connection_error("database unavailable"))
    }

    async fn save(&self, _entity: &User) -> Result<(), StoreError> {
        Err(StoreError::connection_error("database unavailable"))
    }

    async fn remove(&self, _id: &u64) -> Result<(), StoreError> {
        Err(StoreError::connection_error("database unavailable"))
    }

    fn backend_name(&self) -> &'static str {
        "broken"
    }
}

/// Everything a test needs to poke at one node, with handles to the concrete
/// in-memory backends behind the trait objects.
pub struct Node {
    pub cache: CacheOrchestrator<User>,
    pub store: Arc<InMemoryStore<User>>,
    pub shared: MemorySharedCache,
    pub locks: MemoryLockService,
    pub bus: RecordingBus,
}

pub fn small_filter() -> Arc<ExistenceFilter> {
    Arc::new(ExistenceFilter::with_rate(10_000, 0.01))
}

pub fn node(policy: CachePolicy) -> Node {
    node_with_store(policy, Arc::new(InMemoryStore::new()))
}

pub fn node_with_store(policy: CachePolicy, store: Arc<InMemoryStore<User>>) -> Node {
    let shared = MemorySharedCache::new();
    let locks = MemoryLockService::new();
    let bus = RecordingBus::new();
    let dyn_store: DynStore<User> = store.clone();

    let cache = CacheOrchestrator::<User>::builder()
        .store(dyn_store)
        .shared(Arc::new(shared.clone()))
        .locks(Arc::new(locks.clone()))
        .bus(Arc::new(bus.clone()))
        .filter(small_filter())
        .policy(policy)
        .build()
        .unwrap();

    Node {
        cache,
        store,
        shared,
        locks,
        bus,
    }
}

/// A node of a cluster: shares the store and cluster backends with its peers
/// but owns its L1 and existence filter.
pub fn cluster_member(
    policy: CachePolicy,
    store: Arc<InMemoryStore<User>>,
    backends: &ClusterBackends,
) -> CacheOrchestrator<User> {
    let dyn_store: DynStore<User> = store;
    CacheOrchestrator::<User>::builder()
        .store(dyn_store)
        .backends(backends)
        .filter(small_filter())
        .policy(policy)
        .build()
        .unwrap()
}

pub fn user(id: u64, name: &str) -> User {
    User::new(id, name, format!("{name}@example.com"))
}
