//! Cluster-shared L2 tier.
//!
//! ## Backends
//!
//! - **Redis**: multi-instance mode, entries are `SET ... PX` with the physical TTL
//! - **Memory**: single-instance fallback (and test double) on a moka cache
//!   with per-entry expiry
//!
//! Values are opaque bytes here; envelope encoding happens in the orchestrator.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_redis::Pool;
use moka::Expiry;
use moka::future::Cache;
use redis::AsyncCommands;

use super::error::CacheResult;

/// Cluster-shared key/value tier with per-entry physical TTL.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Read a value. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Write a value that physically disappears after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Delete keys. Deleting absent keys is not an error.
    async fn delete(&self, keys: &[String]) -> CacheResult<()>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// Redis-backed shared tier.
#[derive(Clone)]
pub struct RedisSharedCache {
    pool: Pool,
}

impl RedisSharedCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SharedCache for RedisSharedCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await?;
        let value = conn.get::<_, Option<Vec<u8>>>(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        conn.pset_ex::<_, _, ()>(key, value, ttl_ms).await?;
        tracing::debug!(key = %key, ttl_ms, "cache set (L2)");
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    ttl: Duration,
    expires_at: Instant,
}

/// Expires each entry after the TTL it was written with.
struct PhysicalTtl;

impl Expiry<String, MemoryEntry> for PhysicalTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MemoryEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &MemoryEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process stand-in for the shared tier.
///
/// Clones share the same table, so several orchestrators built from clones
/// behave like instances sharing one Redis. Expired entries are invisible at
/// once and reclaimed by moka's housekeeping.
#[derive(Clone)]
pub struct MemorySharedCache {
    entries: Cache<String, MemoryEntry>,
}

impl Default for MemorySharedCache {
    fn default() -> Self {
        Self {
            entries: Cache::builder().expire_after(PhysicalTtl).build(),
        }
    }
}

impl MemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if an unexpired entry exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remaining physical TTL of `key`, if present.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        self.entries
            .get(key)
            .await
            .and_then(|entry| entry.expires_at.checked_duration_since(Instant::now()))
    }

    /// Approximate number of live entries; call [`Self::sync`] first for an
    /// up-to-date figure.
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Run pending housekeeping, which also reclaims expired entries.
    pub async fn sync(&self) {
        self.entries.run_pending_tasks().await;
    }
}

#[async_trait]
impl SharedCache for MemorySharedCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let entry = MemoryEntry {
            value,
            ttl,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        for key in keys {
            self.entries.invalidate(key).await;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
