//! Read-through / invalidate-on-write coordination across all tiers.
//!
//! ## Read path
//!
//! ```text
//! get(id)
//!   ├─ L1 fresh?                        → return
//!   ├─ L2 present?  backfill L1
//!   │     ├─ fresh                       → return
//!   │     └─ stale → try refresh lock → spawn reload, return stale value now
//!   ├─ negative marker (L1, then confirmed in L2)? → None
//!   ├─ filter says "never existed"?      → write presumed marker, None
//!   └─ load lock
//!         ├─ acquired → re-check L2, else load from store, write tiers, release
//!         └─ busy     → back off, re-check L2 once, else None
//! ```
//!
//! Every L2 envelope found along the way goes through the same fresh/stale
//! branch, so a stale value is never served without a refresh attempt.
//!
//! ## Write path
//!
//! ```text
//! update/delete(id)
//!   ├─ system of record
//!   ├─ round 1: DEL L2 (positive + negative), evict L1, PUBLISH key
//!   └─ round 2 after `double_delete_delay`, in the background
//! ```
//!
//! Only system-of-record failures reach the caller. Every tier failure is
//! logged and treated as a miss, and every lock-service failure degrades to
//! doing the work without the lock.

use std::sync::Arc;
use std::time::Duration;

use tiercache_store::{DynStore, Entity, StoreError, StoreResult};
use tokio::task::JoinHandle;

use super::envelope::CacheEnvelope;
use super::error::{CacheError, CacheResult};
use super::filter::ExistenceFilter;
use super::keys::KeySpace;
use super::local::LocalCache;
use super::lock::{LockService, LockToken, MemoryLockService};
use super::policy::CachePolicy;
use super::pubsub::{CacheInvalidationListener, InvalidationBus, MemoryInvalidationBus};
use super::shared::{MemorySharedCache, SharedCache};
use super::tasks::BackgroundTasks;
use super::ClusterBackends;

/// Multi-tier cache in front of one entity type's system of record.
///
/// Cheap to clone; clones share every tier.
pub struct CacheOrchestrator<T: Entity> {
    inner: Arc<Inner<T>>,
}

impl<T: Entity> Clone for CacheOrchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: Entity> {
    keys: KeySpace,
    policy: CachePolicy,
    local: Arc<LocalCache<T>>,
    shared: Arc<dyn SharedCache>,
    locks: Arc<dyn LockService>,
    bus: Arc<dyn InvalidationBus>,
    filter: Arc<ExistenceFilter>,
    store: DynStore<T>,
    tasks: BackgroundTasks,
}

impl<T: Entity> CacheOrchestrator<T> {
    pub fn builder() -> CacheOrchestratorBuilder<T> {
        CacheOrchestratorBuilder::new()
    }

    /// Read an entity through the cache.
    ///
    /// Returns `Ok(None)` when the entity does not exist, is known to be absent
    /// (negative marker or existence filter), or another caller is loading it
    /// and has not published a value within the back-off window.
    pub async fn get(&self, id: &T::Id) -> StoreResult<Option<T>> {
        let inner = &self.inner;
        let key = inner.keys.positive(id);

        if let Some(envelope) = inner.local.get(&key).await {
            if envelope.is_fresh() {
                tracing::debug!(key = %key, "cache hit (L1)");
                return Ok(envelope.data().cloned());
            }
        }

        if let Some(envelope) = inner.read_shared(&key).await {
            return Ok(self.serve_shared(id, &key, envelope).await);
        }

        if inner.negative_marker_present(id).await {
            tracing::debug!(key = %key, "negative marker hit");
            return Ok(None);
        }

        if !inner.filter.might_contain(id) {
            tracing::debug!(key = %key, "existence filter rejected id");
            inner.write_presumed_negative(id).await;
            return Ok(None);
        }

        self.load(id, &key).await
    }

    /// Persist `value` under `id`, then invalidate every tier.
    ///
    /// `id` must equal `value.id()`. Cached copies are dropped, not replaced;
    /// the next read loads the new value.
    pub async fn update(&self, id: &T::Id, value: T) -> StoreResult<()> {
        if value.id() != *id {
            return Err(StoreError::invalid_entity(format!(
                "entity id {} does not match requested id {}",
                value.id(),
                id
            )));
        }

        let inner = &self.inner;
        inner.store.save(&value).await?;
        inner.filter.add(id);

        let key = inner.keys.positive(id);
        inner.invalidate(&key, 1).await;
        self.schedule_second_round(key);
        Ok(())
    }

    /// Remove the entity from the system of record, then invalidate every tier.
    ///
    /// The id stays in the existence filter until the next rebuild; the
    /// negative marker written by the next read covers it meanwhile.
    pub async fn delete(&self, id: &T::Id) -> StoreResult<()> {
        let inner = &self.inner;
        inner.store.remove(id).await?;

        let key = inner.keys.positive(id);
        inner.invalidate(&key, 1).await;
        self.schedule_second_round(key);
        Ok(())
    }

    /// Subscribe this instance's L1 to the invalidation bus.
    ///
    /// The subscription is open when this returns.
    pub async fn start_invalidation_listener(&self) -> JoinHandle<()> {
        CacheInvalidationListener {
            bus: Arc::clone(&self.inner.bus),
            local_cache: self.inner.local.clone(),
        }
        .start()
        .await
    }

    pub fn existence_filter(&self) -> &Arc<ExistenceFilter> {
        &self.inner.filter
    }

    pub fn local(&self) -> &LocalCache<T> {
        &self.inner.local
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.inner.keys
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.inner.policy
    }

    /// Refreshes and delayed invalidations spawned by this orchestrator.
    pub fn background(&self) -> &BackgroundTasks {
        &self.inner.tasks
    }

    /// Single-flight load behind the load lock.
    async fn load(&self, id: &T::Id, key: &str) -> StoreResult<Option<T>> {
        let inner = &self.inner;
        let lock_key = inner.keys.load_lock(key);

        match inner
            .locks
            .try_acquire(&lock_key, inner.policy.load_lock_ttl)
            .await
        {
            Ok(Some(token)) => {
                // A previous holder may have populated L2 between our miss and our acquire
                let result = match inner.read_shared(key).await {
                    Some(envelope) => Ok(self.serve_shared(id, key, envelope).await),
                    None => inner.load_from_store(id, key).await,
                };
                inner.release(&lock_key, &token).await;
                result
            }
            Ok(None) => {
                tracing::debug!(key = %key, "load in progress elsewhere, backing off");
                tokio::time::sleep(inner.policy.lock_wait_backoff).await;
                match inner.read_shared(key).await {
                    Some(envelope) => Ok(self.serve_shared(id, key, envelope).await),
                    None => {
                        tracing::debug!(key = %key, "no value after back-off, returning absent");
                        Ok(None)
                    }
                }
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "load lock unavailable, loading without it");
                inner.load_from_store(id, key).await
            }
        }
    }

    /// Backfill L1 with an envelope read from L2 and serve its data. A
    /// logically expired envelope is still served, and triggers a refresh.
    async fn serve_shared(&self, id: &T::Id, key: &str, envelope: CacheEnvelope<T>) -> Option<T> {
        let envelope = Arc::new(envelope);
        self.inner.local.put(key, Arc::clone(&envelope)).await;

        if envelope.is_fresh() {
            tracing::debug!(key = %key, "cache hit (L2)");
        } else {
            tracing::debug!(key = %key, "stale hit (L2), serving stale value");
            self.refresh_in_background(id, key).await;
        }
        envelope.data().cloned()
    }

    /// Take the refresh lock and, if won, reload the entity off the request path.
    ///
    /// The background slot is reserved before the lock is taken, so a won lock
    /// never waits in the task queue while its TTL runs down.
    async fn refresh_in_background(&self, id: &T::Id, key: &str) {
        let inner = &self.inner;
        let lock_key = inner.keys.refresh_lock(key);

        let Some(slot) = inner.tasks.try_reserve() else {
            tracing::debug!(key = %key, "background work saturated, skipping refresh");
            return;
        };

        let token = match inner
            .locks
            .try_acquire(&lock_key, inner.policy.refresh_lock_ttl)
            .await
        {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!(key = %key, "refresh already in progress");
                return;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "refresh lock unavailable, skipping refresh");
                return;
            }
        };

        let task_inner = Arc::clone(inner);
        let id = id.clone();
        let key = key.to_string();
        inner.tasks.spawn_reserved("refresh", slot, async move {
            task_inner.refresh(&id, &key).await;
            task_inner.release(&lock_key, &token).await;
        });
    }

    fn schedule_second_round(&self, key: String) {
        let inner = Arc::clone(&self.inner);
        let delay = self.inner.policy.double_delete_delay;
        self.inner.tasks.spawn_after("double-delete", delay, async move {
            inner.invalidate(&key, 2).await;
        });
    }
}

impl<T: Entity> Inner<T> {
    /// Read and decode an L2 entry. Errors count as a miss; undecodable
    /// entries are also deleted so the next writer can replace them.
    async fn read_shared(&self, key: &str) -> Option<CacheEnvelope<T>> {
        let bytes = match self.shared.get(key).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "L2 read failed, treating as miss");
                return None;
            }
        };

        match CacheEnvelope::decode(&bytes) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "undecodable L2 entry, deleting");
                if let Err(e) = self.shared.delete(&[key.to_string()]).await {
                    tracing::warn!(key = %key, error = %e, "failed to delete undecodable L2 entry");
                }
                None
            }
        }
    }

    /// A fresh marker in L1 was written or backfilled by this instance and
    /// always counts. In L2 only confirmed markers count: a presumed marker
    /// reflects another instance's filter, which may not know the id yet.
    async fn negative_marker_present(&self, id: &T::Id) -> bool {
        let key = self.keys.negative(id);

        if let Some(envelope) = self.local.get(&key).await {
            if envelope.is_negative() && envelope.is_fresh() {
                return true;
            }
        }

        match self.read_shared(&key).await {
            Some(envelope) if envelope.is_confirmed_negative() && envelope.is_fresh() => {
                self.local.put(&key, Arc::new(envelope)).await;
                true
            }
            _ => false,
        }
    }

    async fn load_from_store(&self, id: &T::Id, key: &str) -> StoreResult<Option<T>> {
        tracing::debug!(key = %key, backend = self.store.backend_name(), "loading from system of record");
        match self.store.find(id).await? {
            Some(entity) => {
                self.write_positive(key, entity.clone()).await;
                self.filter.add(id);
                Ok(Some(entity))
            }
            None => {
                self.write_negative(id).await;
                Ok(None)
            }
        }
    }

    async fn refresh(&self, id: &T::Id, key: &str) {
        match self.store.find(id).await {
            Ok(Some(entity)) => {
                self.write_positive(key, entity).await;
                self.filter.add(id);
                tracing::debug!(key = %key, "refreshed stale entry");
            }
            Ok(None) => {
                // Gone from the store: replace the stale value with a marker
                if let Err(e) = self.shared.delete(&[key.to_string()]).await {
                    tracing::warn!(key = %key, error = %e, "failed to drop stale L2 entry");
                }
                self.local.evict(key).await;
                self.write_negative(id).await;
                tracing::debug!(key = %key, "entity vanished during refresh");
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "background refresh failed");
            }
        }
    }

    /// Write a positive envelope with a jittered logical TTL to L2 and L1.
    async fn write_positive(&self, key: &str, entity: T) {
        let envelope = CacheEnvelope::positive(entity, self.policy.logical_ttl());
        self.write(key, envelope, self.policy.physical_ttl).await;
    }

    /// The system of record reported `id` absent.
    async fn write_negative(&self, id: &T::Id) {
        let key = self.keys.negative(id);
        let envelope = CacheEnvelope::negative(self.policy.negative_ttl);
        self.write(&key, envelope, self.policy.negative_ttl).await;
    }

    /// This instance's existence filter rejected `id`.
    async fn write_presumed_negative(&self, id: &T::Id) {
        let key = self.keys.negative(id);
        let envelope = CacheEnvelope::presumed_negative(self.policy.negative_ttl);
        self.write(&key, envelope, self.policy.negative_ttl).await;
    }

    async fn write(&self, key: &str, envelope: CacheEnvelope<T>, physical_ttl: Duration) {
        match envelope.encode() {
            Ok(bytes) => {
                if let Err(e) = self.shared.set(key, bytes, physical_ttl).await {
                    tracing::warn!(key = %key, error = %e, "L2 write failed");
                }
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to encode envelope");
            }
        }
        self.local.put(key, Arc::new(envelope)).await;
    }

    /// One invalidation round: DEL both keys in L2, evict L1, broadcast.
    async fn invalidate(&self, key: &str, round: u8) {
        let mut doomed = vec![key.to_string()];
        if let Some(negative) = self.keys.negative_for(key) {
            doomed.push(negative);
        }

        if let Err(e) = self.shared.delete(&doomed).await {
            tracing::warn!(key = %key, round, error = %e, "L2 invalidation failed");
        }
        self.local.evict(key).await;
        if let Err(e) = self.bus.publish(key).await {
            tracing::warn!(key = %key, round, error = %e, "invalidation publish failed");
        }
        tracing::debug!(key = %key, round, "invalidated");
    }

    async fn release(&self, lock_key: &str, token: &LockToken) {
        if let Err(e) = self.locks.release(lock_key, token).await {
            tracing::warn!(lock = %lock_key, error = %e, "lock release failed, waiting for TTL");
        }
    }
}

/// Assembles a [`CacheOrchestrator`].
///
/// Only the store is required. Cluster backends default to the in-process
/// implementations, which is single-instance mode.
pub struct CacheOrchestratorBuilder<T: Entity> {
    store: Option<DynStore<T>>,
    shared: Option<Arc<dyn SharedCache>>,
    locks: Option<Arc<dyn LockService>>,
    bus: Option<Arc<dyn InvalidationBus>>,
    filter: Option<Arc<ExistenceFilter>>,
    keys: KeySpace,
    policy: CachePolicy,
}

impl<T: Entity> Default for CacheOrchestratorBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> CacheOrchestratorBuilder<T> {
    pub fn new() -> Self {
        Self {
            store: None,
            shared: None,
            locks: None,
            bus: None,
            filter: None,
            keys: KeySpace::new("user", "v1"),
            policy: CachePolicy::default(),
        }
    }

    pub fn store(mut self, store: DynStore<T>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn shared(mut self, shared: Arc<dyn SharedCache>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn locks(mut self, locks: Arc<dyn LockService>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn InvalidationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Use all three cluster-wide backends at once.
    pub fn backends(self, backends: &ClusterBackends) -> Self {
        self.shared(Arc::clone(&backends.shared))
            .locks(Arc::clone(&backends.locks))
            .bus(Arc::clone(&backends.bus))
    }

    pub fn filter(mut self, filter: Arc<ExistenceFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn key_space(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> CacheResult<CacheOrchestrator<T>> {
        let store = self.store.ok_or(CacheError::MissingComponent("store"))?;
        let filter = self.filter.ok_or(CacheError::MissingComponent("filter"))?;

        let local = Arc::new(LocalCache::new(
            self.keys.clone(),
            self.policy.local_max_entries,
            self.policy.local_ttl,
        ));
        let tasks = BackgroundTasks::new(self.policy.max_background_tasks);

        Ok(CacheOrchestrator {
            inner: Arc::new(Inner {
                keys: self.keys,
                local,
                shared: self
                    .shared
                    .unwrap_or_else(|| Arc::new(MemorySharedCache::new())),
                locks: self
                    .locks
                    .unwrap_or_else(|| Arc::new(MemoryLockService::new())),
                bus: self
                    .bus
                    .unwrap_or_else(|| Arc::new(MemoryInvalidationBus::new())),
                filter,
                store,
                tasks,
                policy: self.policy,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tiercache_store_memory::InMemoryStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: u32,
        owner: String,
    }

    impl Entity for Account {
        type Id = u32;
        fn id(&self) -> u32 {
            self.id
        }
    }

    fn filter() -> Arc<ExistenceFilter> {
        Arc::new(ExistenceFilter::with_rate(1_000, 0.01))
    }

    #[test]
    fn test_build_requires_store_and_filter() {
        let missing_store = CacheOrchestrator::<Account>::builder().filter(filter()).build();
        assert!(matches!(missing_store, Err(CacheError::MissingComponent("store"))));

        let store: DynStore<Account> = Arc::new(InMemoryStore::new());
        let missing_filter = CacheOrchestrator::<Account>::builder().store(store).build();
        assert!(matches!(missing_filter, Err(CacheError::MissingComponent("filter"))));
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_l1() {
        let store = Arc::new(InMemoryStore::new());
        store.seed(Account { id: 1, owner: "ann".into() });
        let cache = CacheOrchestrator::<Account>::builder()
            .store(store.clone())
            .filter(filter())
            .build()
            .unwrap();
        cache.existence_filter().add(&1u32);

        let first = cache.get(&1).await.unwrap();
        let second = cache.get(&1).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.find_calls(), 1);
    }

    #[tokio::test]
    async fn test_update_rejects_mismatched_id() {
        let store = Arc::new(InMemoryStore::new());
        let cache = CacheOrchestrator::<Account>::builder()
            .store(store.clone())
            .filter(filter())
            .build()
            .unwrap();

        let err = cache
            .update(&1, Account { id: 2, owner: "bob".into() })
            .await
            .unwrap_err();

        assert!(err.is_invalid_entity());
        assert_eq!(store.save_calls(), 0);
    }
}
