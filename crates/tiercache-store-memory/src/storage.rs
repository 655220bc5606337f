use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use papaya::HashMap as PapayaHashMap;
use tiercache_store::{Entity, StoreError, SystemOfRecord};

/// In-memory system of record using papaya lock-free HashMap.
///
/// Every trait call is counted so tests can assert how often the cache
/// actually reached the authoritative store.
#[derive(Debug)]
pub struct InMemoryStore<T: Entity> {
    data: PapayaHashMap<T::Id, T>,
    latency: Option<Duration>,
    find_calls: AtomicU64,
    save_calls: AtomicU64,
    remove_calls: AtomicU64,
}

impl<T: Entity> InMemoryStore<T> {
    /// Creates an empty store that answers immediately.
    pub fn new() -> Self {
        Self {
            data: PapayaHashMap::new(),
            latency: None,
            find_calls: AtomicU64::new(0),
            save_calls: AtomicU64::new(0),
            remove_calls: AtomicU64::new(0),
        }
    }

    /// Creates an empty store that sleeps for `latency` before every call.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    /// Inserts an entity without counting it as a `save` call.
    pub fn seed(&self, entity: T) {
        self.data.pin().insert(entity.id(), entity);
    }

    /// Returns the stored entity without counting it as a `find` call.
    pub fn peek(&self, id: &T::Id) -> Option<T> {
        self.data.pin().get(id).cloned()
    }

    /// Snapshot of every stored id, for rebuilding an existence filter.
    pub fn ids(&self) -> Vec<T::Id> {
        self.data.pin().keys().cloned().collect()
    }

    /// Number of entities currently stored.
    pub fn len(&self) -> usize {
        self.data.pin().len()
    }

    /// Returns true if the store holds no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `find` calls served so far.
    pub fn find_calls(&self) -> u64 {
        self.find_calls.load(Ordering::SeqCst)
    }

    /// Number of `save` calls served so far.
    pub fn save_calls(&self) -> u64 {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Number of `remove` calls served so far.
    pub fn remove_calls(&self) -> u64 {
        self.remove_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl<T: Entity> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> SystemOfRecord<T> for InMemoryStore<T> {
    async fn find(&self, id: &T::Id) -> Result<Option<T>, StoreError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let found = self.data.pin().get(id).cloned();
        tracing::trace!(id = %id, hit = found.is_some(), "memory store find");
        Ok(found)
    }

    async fn save(&self, entity: &T) -> Result<(), StoreError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.data.pin().insert(entity.id(), entity.clone());
        Ok(())
    }

    async fn remove(&self, id: &T::Id) -> Result<(), StoreError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.data.pin().remove(id);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
