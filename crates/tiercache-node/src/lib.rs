pub mod cache;
pub mod config;
pub mod model;
pub mod observability;

pub use cache::{CacheOrchestrator, CacheOrchestratorBuilder, CachePolicy, ClusterBackends};
pub use config::{AppConfig, CacheConfig, FilterConfig, LoggingConfig, RedisConfig};
pub use model::User;
pub use observability::init_tracing;

/// Create the cluster-wide cache backends based on configuration.
///
/// ## Cache Modes
///
/// - **Redis disabled**: in-process L2, locks and bus (single instance)
/// - **Redis enabled**: Attempts to connect to Redis, falls back to in-process on failure
///
/// ## Graceful Degradation
///
/// If the Redis connection fails the node still starts, but instances no
/// longer share L2, locks or invalidations.
pub async fn create_cluster_backends(config: &RedisConfig) -> ClusterBackends {
    use std::time::Duration;

    if !config.enabled {
        tracing::info!("Redis disabled, running in single-instance mode");
        return ClusterBackends::memory();
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Duration::from_millis(config.timeout_ms);
    let pool_config = redis_config
        .pool
        .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to single-instance mode."
            );
            return ClusterBackends::memory();
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            ClusterBackends::redis(pool, &config.url)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to single-instance mode."
            );
            ClusterBackends::memory()
        }
    }
}
