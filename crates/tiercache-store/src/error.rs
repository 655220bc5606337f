//! Error types for system-of-record operations.
//!
//! These are the only errors the cache engine propagates to its callers: tier,
//! lock and bus failures are absorbed, but a failing authoritative store cannot
//! be papered over.

/// Errors that can occur while talking to the system of record.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The entity passed in is not acceptable for the requested operation.
    #[error("Invalid entity: {message}")]
    InvalidEntity {
        /// Description of why the entity is invalid.
        message: String,
    },

    /// Failed to reach the backing store.
    #[error("Connection error: {message}")]
    ConnectionError {
        /// Description of the connection error.
        message: String,
    },

    /// An internal store error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `InvalidEntity` error.
    #[must_use]
    pub fn invalid_entity(message: impl Into<String>) -> Self {
        Self::InvalidEntity {
            message: message.into(),
        }
    }

    /// Creates a new `ConnectionError` error.
    #[must_use]
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is an invalid entity error.
    #[must_use]
    pub fn is_invalid_entity(&self) -> bool {
        matches!(self, Self::InvalidEntity { .. })
    }
}
