//! # tiercache-store
//!
//! The system-of-record abstraction the tiercache engine sits in front of.
//!
//! This crate only defines the contract; implementations live in separate
//! crates (see `tiercache-store-memory`).
//!
//! ## Implementing a backend
//!
//! ```ignore
//! use async_trait::async_trait;
//! use tiercache_store::{Entity, StoreError, SystemOfRecord};
//!
//! struct PgUsers {
//!     // ...
//! }
//!
//! #[async_trait]
//! impl SystemOfRecord<User> for PgUsers {
//!     async fn find(&self, id: &u64) -> Result<Option<User>, StoreError> {
//!         // SELECT id, name, email FROM users WHERE id = $1
//!     }
//!     // ... save, remove
//! }
//! ```

mod error;
mod traits;

pub use error::StoreError;
pub use traits::{Entity, SystemOfRecord};

/// Type alias for a store result.
pub type StoreResult<T> = Result<T, StoreError>;

/// Type alias for a shared system-of-record trait object.
pub type DynStore<T> = std::sync::Arc<dyn SystemOfRecord<T>>;
