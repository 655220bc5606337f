//! Process-local L1 tier.
//!
//! A bounded moka cache with a short physical TTL. It is the only tier that
//! cannot fail, so every method here is infallible.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use super::envelope::CacheEnvelope;
use super::keys::KeySpace;

/// Anything that can drop a key from a process-local tier.
///
/// The invalidation listener only knows cache keys as strings, so it talks to
/// the local tier through this object-safe trait regardless of entity type.
#[async_trait]
pub trait EvictKey: Send + Sync {
    /// Remove `key` from the local tier. Evicting an absent key is a no-op.
    async fn evict_key(&self, key: &str);
}

/// L1 cache of envelopes keyed by cache key.
///
/// Envelopes are stored behind `Arc` so hits are a reference-count bump.
#[derive(Clone)]
pub struct LocalCache<T> {
    inner: Cache<String, Arc<CacheEnvelope<T>>>,
    keys: KeySpace,
}

impl<T: Send + Sync + 'static> LocalCache<T> {
    /// Create a local tier holding at most `max_entries` envelopes, each for at
    /// most `ttl` after it was written.
    pub fn new(keys: KeySpace, max_entries: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { inner, keys }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<CacheEnvelope<T>>> {
        self.inner.get(key).await
    }

    /// Store an envelope, replacing whatever was there.
    pub async fn put(&self, key: &str, envelope: Arc<CacheEnvelope<T>>) {
        self.inner.insert(key.to_string(), envelope).await;
    }

    /// Remove a positive key together with its negative-marker companion.
    pub async fn evict(&self, key: &str) {
        self.inner.invalidate(key).await;
        if let Some(negative) = self.keys.negative_for(key) {
            self.inner.invalidate(&negative).await;
        }
        tracing::debug!(key = %key, "evicted from L1");
    }

    /// Approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Flush moka's pending maintenance so counts and expiries are current.
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> EvictKey for LocalCache<T> {
    async fn evict_key(&self, key: &str) {
        self.evict(key).await;
    }
}
