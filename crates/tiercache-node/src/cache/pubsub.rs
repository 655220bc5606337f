//! Pub/Sub for cross-instance L1 invalidation.
//!
//! ## Example Flow
//!
//! ```text
//! Instance 1: update(42) → PUBLISH cache:invalidate "user:v1:42"
//!   ↓
//! Instance 2: listener receives "user:v1:42" → evicts from L1
//! Instance 3: listener receives "user:v1:42" → evicts from L1
//! ```
//!
//! Delivery is at-most-once and unordered. Evicting an absent key is a no-op,
//! so duplicate deliveries (including an instance hearing its own publish) are
//! harmless.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use futures_util::{Stream, StreamExt};
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::error::{CacheError, CacheResult};
use super::keys::INVALIDATION_CHANNEL;
use super::local::EvictKey;

/// Stream of invalidated cache keys.
pub type KeyStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Broadcast channel carrying invalidated cache keys to every instance.
#[async_trait]
pub trait InvalidationBus: Send + Sync {
    /// Broadcast `key` to all subscribers.
    async fn publish(&self, key: &str) -> CacheResult<()>;

    /// Open a new subscription. The stream ends when the connection is lost.
    async fn subscribe(&self) -> CacheResult<KeyStream>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// Redis Pub/Sub bus on the `cache:invalidate` channel.
#[derive(Clone)]
pub struct RedisInvalidationBus {
    pool: Pool,
    redis_url: String,
}

impl RedisInvalidationBus {
    pub fn new(pool: Pool, redis_url: impl Into<String>) -> Self {
        Self {
            pool,
            redis_url: redis_url.into(),
        }
    }
}

#[async_trait]
impl InvalidationBus for RedisInvalidationBus {
    async fn publish(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        conn.publish::<_, _, ()>(INVALIDATION_CHANNEL, key).await?;
        tracing::debug!(key = %key, "published cache invalidation");
        Ok(())
    }

    async fn subscribe(&self) -> CacheResult<KeyStream> {
        // Pooled connections cannot SUBSCRIBE, so use a dedicated client
        let client = redis::Client::open(self.redis_url.as_str())
            .map_err(|e| CacheError::Subscribe(format!("failed to create Redis client: {e}")))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::Subscribe(format!("failed to get pub/sub connection: {e}")))?;

        pubsub
            .subscribe(INVALIDATION_CHANNEL)
            .await
            .map_err(|e| CacheError::Subscribe(format!("failed to subscribe: {e}")))?;

        tracing::info!(channel = INVALIDATION_CHANNEL, "Subscribed to invalidation channel");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse invalidation message payload");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Default buffer size for the in-process bus.
/// Slow subscribers that fall further behind lose messages.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// In-process bus on a tokio broadcast channel.
///
/// Clones share the same channel, so orchestrators built from clones hear each
/// other like instances on one Redis.
#[derive(Clone)]
pub struct MemoryInvalidationBus {
    sender: broadcast::Sender<String>,
}

impl MemoryInvalidationBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryInvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvalidationBus for MemoryInvalidationBus {
    async fn publish(&self, key: &str) -> CacheResult<()> {
        // No subscribers is not a failure: nobody has anything to evict.
        let _ = self.sender.send(key.to_string());
        Ok(())
    }

    async fn subscribe(&self) -> CacheResult<KeyStream> {
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(|item| async move {
            match item {
                Ok(key) => Some(key),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "invalidation subscriber lagged, messages dropped");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Subscribes to the invalidation bus and evicts received keys from L1.
///
/// ## How It Works
///
/// 1. Subscribe to the bus
/// 2. For every received key, evict it (and its negative companion) from L1
/// 3. If the subscription fails or ends, resubscribe with exponential backoff
pub struct CacheInvalidationListener {
    pub bus: Arc<dyn InvalidationBus>,
    pub local_cache: Arc<dyn EvictKey>,
}

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300); // 5 minutes max

impl CacheInvalidationListener {
    /// Start listening for invalidation events.
    ///
    /// The first subscription is opened before this returns, so keys published
    /// afterwards are guaranteed to reach this instance (connection permitting).
    /// Processing and reconnects run on a background task.
    pub async fn start(self) -> JoinHandle<()> {
        let initial = match self.bus.subscribe().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::error!(error = %e, "Initial invalidation subscription failed, retrying in background");
                None
            }
        };

        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            let mut next = initial;

            loop {
                let result = match next.take() {
                    Some(stream) => self.drain(stream).await,
                    None => self.run().await,
                };
                match result {
                    Ok(()) => {
                        backoff = INITIAL_BACKOFF;
                    }
                    Err(CacheError::StreamEnded) => {
                        // The subscription was healthy until now; start over from the short delay
                        tracing::warn!("Invalidation stream ended, resubscribing");
                        backoff = INITIAL_BACKOFF;
                        tokio::time::sleep(backoff).await;
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "Cache invalidation listener error, reconnecting..."
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        })
    }

    async fn run(&self) -> CacheResult<()> {
        let stream = self.bus.subscribe().await?;
        self.drain(stream).await
    }

    async fn drain(&self, mut stream: KeyStream) -> CacheResult<()> {
        while let Some(key) = stream.next().await {
            tracing::debug!(key = %key, "received cache invalidation");
            self.local_cache.evict_key(&key).await;
        }
        Err(CacheError::StreamEnded)
    }
}
