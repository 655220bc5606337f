//! Entities served by the node.

use serde::{Deserialize, Serialize};
use tiercache_store::Entity;

/// A user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
}

impl User {
    pub fn new(id: u64, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
        }
    }
}

impl Entity for User {
    type Id = u64;

    fn id(&self) -> u64 {
        self.id
    }
}
