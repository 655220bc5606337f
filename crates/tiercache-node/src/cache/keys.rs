//! Cache key namespacing.
//!
//! ## Key Format
//!
//! - positive entry: `{entity}:{version}:{id}` (e.g. `user:v1:42`)
//! - negative marker: `{entity}:null:{version}:{id}` (e.g. `user:null:v1:42`)
//! - load lock: `load:{positive key}`
//! - refresh lock: `refresh:{positive key}`
//!
//! Negative markers live in their own namespace so a later positive write never
//! inherits the marker's short TTL. Bumping the schema version orphans every
//! entry written by an older layout.

use std::fmt::Display;

/// Channel every instance subscribes to for L1 invalidation.
pub const INVALIDATION_CHANNEL: &str = "cache:invalidate";

const LOAD_LOCK_PREFIX: &str = "load:";
const REFRESH_LOCK_PREFIX: &str = "refresh:";

/// Deterministic key derivation for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    entity: String,
    version: String,
    positive_prefix: String,
    negative_prefix: String,
}

impl KeySpace {
    pub fn new(entity: impl Into<String>, version: impl Into<String>) -> Self {
        let entity = entity.into();
        let version = version.into();
        Self {
            positive_prefix: format!("{entity}:{version}:"),
            negative_prefix: format!("{entity}:null:{version}:"),
            entity,
            version,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Key of the positive envelope for `id`.
    #[inline]
    pub fn positive(&self, id: &impl Display) -> String {
        format!("{}{id}", self.positive_prefix)
    }

    /// Key of the negative marker for `id`.
    #[inline]
    pub fn negative(&self, id: &impl Display) -> String {
        format!("{}{id}", self.negative_prefix)
    }

    /// Map a positive key to its negative-marker companion.
    ///
    /// Returns `None` for keys outside this key space.
    pub fn negative_for(&self, positive_key: &str) -> Option<String> {
        positive_key
            .strip_prefix(&self.positive_prefix)
            .map(|id| format!("{}{id}", self.negative_prefix))
    }

    /// Lock key guarding the single-flight load of `key`.
    pub fn load_lock(&self, key: &str) -> String {
        format!("{LOAD_LOCK_PREFIX}{key}")
    }

    /// Lock key guarding the background refresh of `key`.
    pub fn refresh_lock(&self, key: &str) -> String {
        format!("{REFRESH_LOCK_PREFIX}{key}")
    }
}
