//! Traits every authoritative backing store must implement.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// A keyed entity that can be cached.
///
/// Entities are serialized whole into cache envelopes, so they must round-trip
/// through serde. The id is rendered with `Display` when building cache keys and
/// hashed with `Hash` by the existence filter, so both must be stable across
/// processes.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Identifier type of this entity.
    type Id: Display + Debug + Hash + Eq + Clone + Send + Sync + 'static;

    /// Returns the id of this entity.
    fn id(&self) -> Self::Id;
}

/// The authoritative store sitting behind the cache.
///
/// Implementations must be thread-safe (`Send + Sync`). The cache never
/// retries a failed call; errors are surfaced to the caller as-is.
///
/// # Example
///
/// ```ignore
/// use tiercache_store::{SystemOfRecord, StoreError};
///
/// async fn rename(store: &dyn SystemOfRecord<User>, id: &u64, name: &str) -> Result<(), StoreError> {
///     let Some(mut user) = store.find(id).await? else {
///         return Err(StoreError::invalid_entity(format!("user {id} does not exist")));
///     };
///     user.name = name.to_string();
///     store.save(&user).await
/// }
/// ```
#[async_trait]
pub trait SystemOfRecord<T: Entity>: Send + Sync {
    /// Reads an entity by id.
    ///
    /// Returns `None` if the entity does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing entities.
    async fn find(&self, id: &T::Id) -> Result<Option<T>, StoreError>;

    /// Writes the full entity, creating or replacing it.
    async fn save(&self, entity: &T) -> Result<(), StoreError>;

    /// Removes an entity by id. Removing an absent id is not an error.
    async fn remove(&self, id: &T::Id) -> Result<(), StoreError>;

    /// Returns the name of this backend for logging.
    fn backend_name(&self) -> &'static str;
}
