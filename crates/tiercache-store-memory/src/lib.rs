//! In-memory system-of-record backend for tiercache.
//!
//! This crate provides an implementation of the `SystemOfRecord` trait from
//! `tiercache-store` on top of a papaya lock-free HashMap. It backs local
//! development and the engine's test suites, which is why it counts calls and
//! can simulate query latency.
//!
//! # Example
//!
//! ```ignore
//! use tiercache_store_memory::InMemoryStore;
//! use tiercache_store::SystemOfRecord;
//!
//! let store = InMemoryStore::<User>::new();
//! store.seed(User::new(42, "Al", "a@x"));
//! assert!(store.find(&42).await?.is_some());
//! assert_eq!(store.find_calls(), 1);
//! ```

pub mod storage;

pub use storage::InMemoryStore;
pub use tiercache_store::{Entity, StoreError, SystemOfRecord};

