//! Errors raised by the shared tier, the lock service and the invalidation bus.
//!
//! None of these reach `get`/`update`/`delete` callers: the orchestrator logs
//! them and degrades. They exist so backends can report what went wrong.

/// Errors that can occur while talking to cluster-shared infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Invalidation stream ended")]
    StreamEnded,

    #[error("{0} is required")]
    MissingComponent(&'static str),
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        CacheError::Pool(e.to_string())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Command(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
