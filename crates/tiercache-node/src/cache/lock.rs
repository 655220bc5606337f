//! Distributed advisory locks with ownership tokens.
//!
//! Used for single-flight loads and background refresh. A lock is a key holding
//! a random token with an expiry; only the holder of the matching token can
//! release it early. If the holder dies the TTL releases it.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use deadpool_redis::Pool;

use super::error::CacheResult;

const LOCK_PREFIX: &str = "lock:";

/// Compare-and-delete: only the current holder may release.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Opaque proof of lock ownership.
///
/// Compared by value at release time, so a process whose lock expired and was
/// re-acquired by someone else cannot release the new holder's lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-blocking, non-reentrant mutual exclusion keyed by string.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Take the lock if nobody holds it. `Ok(None)` means someone else does;
    /// that is expected control flow, not an error.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> CacheResult<Option<LockToken>>;

    /// Release the lock if `token` still owns it; otherwise do nothing.
    async fn release(&self, key: &str, token: &LockToken) -> CacheResult<()>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

fn lock_key(key: &str) -> String {
    format!("{LOCK_PREFIX}{key}")
}

/// Redis-backed locks: `SET NX PX` to acquire, a Lua script to release.
#[derive(Clone)]
pub struct RedisLockService {
    pool: Pool,
    release_script: Arc<redis::Script>,
}

impl RedisLockService {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            release_script: Arc::new(redis::Script::new(RELEASE_SCRIPT)),
        }
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> CacheResult<Option<LockToken>> {
        let token = LockToken::generate();
        let mut conn = self.pool.get().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(lock_key(key))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg((ttl.as_millis() as u64).max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|_| token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        let deleted: i64 = self
            .release_script
            .key(lock_key(key))
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            tracing::debug!(key = %key, "lock release skipped, token no longer owns it");
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[derive(Debug)]
struct Held {
    token: LockToken,
    expires_at: Instant,
}

/// In-process lock table for single-instance mode and tests.
///
/// Clones share the same table.
#[derive(Clone, Default)]
pub struct MemoryLockService {
    held: Arc<DashMap<String, Held>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token currently holding `key`, if the lock is live.
    pub fn holder(&self, key: &str) -> Option<LockToken> {
        self.held
            .get(&lock_key(key))
            .filter(|held| held.expires_at > Instant::now())
            .map(|held| held.token.clone())
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> CacheResult<Option<LockToken>> {
        let now = Instant::now();
        let fresh = || Held {
            token: LockToken::generate(),
            expires_at: now + ttl,
        };
        // The entry guard keeps the shard locked, making check-and-set atomic.
        let token = match self.held.entry(lock_key(key)) {
            Entry::Vacant(slot) => {
                let held = fresh();
                let token = held.token.clone();
                slot.insert(held);
                Some(token)
            }
            Entry::Occupied(mut slot) if slot.get().expires_at <= now => {
                let held = fresh();
                let token = held.token.clone();
                slot.insert(held);
                Some(token)
            }
            Entry::Occupied(_) => None,
        };
        Ok(token)
    }

    async fn release(&self, key: &str, token: &LockToken) -> CacheResult<()> {
        self.held
            .remove_if(&lock_key(key), |_, held| held.token == *token);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
