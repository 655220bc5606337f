//! Multi-tier caching for hot entities.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ L1 (moka)    │ →  │ L2 (Redis)   │ →  │ System of    │
//! │ per process  │    │ shared       │    │ record       │
//! └──────────────┘    └──────────────┘    └──────────────┘
//!         ↑                   │
//!         └── cache:invalidate (Pub/Sub) ──┘
//! ```
//!
//! - L1: bounded process-local cache with a short physical TTL
//! - L2: shared key-value store holding JSON envelopes with a logical expiry
//! - Existence filter: Bloom filter over every id known to exist
//! - Locks: single-flight loads and single-refresher stale revalidation
//! - Bus: cross-instance L1 invalidation
//!
//! Without Redis every cluster backend has an in-process counterpart, and the
//! node runs as a single instance.

pub mod envelope;
pub mod error;
pub mod filter;
pub mod keys;
pub mod local;
pub mod lock;
pub mod orchestrator;
pub mod policy;
pub mod pubsub;
pub mod shared;
pub mod tasks;

use std::sync::Arc;

pub use envelope::{CacheEnvelope, now_epoch_ms};
pub use error::{CacheError, CacheResult};
pub use filter::{BloomFilter, ExistenceFilter};
pub use keys::{INVALIDATION_CHANNEL, KeySpace};
pub use local::{EvictKey, LocalCache};
pub use lock::{LockService, LockToken, MemoryLockService, RedisLockService};
pub use orchestrator::{CacheOrchestrator, CacheOrchestratorBuilder};
pub use policy::CachePolicy;
pub use pubsub::{
    CacheInvalidationListener, InvalidationBus, KeyStream, MemoryInvalidationBus,
    RedisInvalidationBus,
};
pub use shared::{MemorySharedCache, RedisSharedCache, SharedCache};
pub use tasks::{BackgroundTasks, Reservation};

/// The three backends every instance of a cluster must share.
#[derive(Clone)]
pub struct ClusterBackends {
    pub shared: Arc<dyn SharedCache>,
    pub locks: Arc<dyn LockService>,
    pub bus: Arc<dyn InvalidationBus>,
}

impl ClusterBackends {
    /// In-process backends. Clones of the result behave like one Redis shared
    /// by several instances.
    pub fn memory() -> Self {
        Self {
            shared: Arc::new(MemorySharedCache::new()),
            locks: Arc::new(MemoryLockService::new()),
            bus: Arc::new(MemoryInvalidationBus::new()),
        }
    }

    /// Redis-backed backends on one pool. Pub/Sub needs its own connection,
    /// opened from `redis_url` on subscribe.
    pub fn redis(pool: deadpool_redis::Pool, redis_url: &str) -> Self {
        Self {
            shared: Arc::new(RedisSharedCache::new(pool.clone())),
            locks: Arc::new(RedisLockService::new(pool.clone())),
            bus: Arc::new(RedisInvalidationBus::new(pool, redis_url)),
        }
    }

    /// Backend name for logging.
    pub fn mode(&self) -> &'static str {
        self.shared.backend_name()
    }
}
