//! Versioned value wrapper stored in both cache tiers.
//!
//! The envelope carries a *logical* expiry that is independent of the physical
//! TTL of the storage entry. In the shared tier the physical TTL of positive
//! entries is always longer than the logical one, which is what makes a
//! logically expired but still present envelope observable for
//! stale-while-revalidate.
//!
//! ## Wire format
//!
//! ```json
//! { "data": { "id": 42, "name": "Al", "email": "a@x" }, "logicalExpireAtEpochMs": 1760000000000 }
//! { "data": null, "logicalExpireAtEpochMs": 1760000030000 }
//! { "data": null, "logicalExpireAtEpochMs": 1760000030000, "presumed": true }
//! ```
//!
//! `presumed` is only written for markers that came from an instance's own
//! existence filter rather than from the system of record.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::CacheResult;

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_epoch_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Immutable cache entry: a value (or a confirmed absence) plus its logical expiry.
///
/// `data = None` is a negative marker. It is different from "no envelope",
/// which means the cache simply does not know. A marker is either confirmed
/// (the system of record reported the entity absent) or presumed (the writing
/// instance's existence filter rejected the id). Filters are per instance, so
/// only confirmed markers mean anything to other instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEnvelope<T> {
    data: Option<T>,
    logical_expire_at_epoch_ms: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    presumed: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl<T> CacheEnvelope<T> {
    /// Create a positive envelope that is logically fresh for `logical_ttl`.
    pub fn positive(data: T, logical_ttl: Duration) -> Self {
        Self::expiring_at(Some(data), now_epoch_ms() + logical_ttl.as_millis() as i64)
    }

    /// Create a confirmed negative marker that is logically fresh for `ttl`.
    pub fn negative(ttl: Duration) -> Self {
        Self::expiring_at(None, now_epoch_ms() + ttl.as_millis() as i64)
    }

    /// Create a negative marker backed only by a local existence-filter miss.
    pub fn presumed_negative(ttl: Duration) -> Self {
        Self {
            presumed: true,
            ..Self::negative(ttl)
        }
    }

    /// Create an envelope with an explicit logical expiry.
    pub fn expiring_at(data: Option<T>, logical_expire_at_epoch_ms: i64) -> Self {
        Self {
            data,
            logical_expire_at_epoch_ms,
            presumed: false,
        }
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn logical_expire_at_epoch_ms(&self) -> i64 {
        self.logical_expire_at_epoch_ms
    }

    /// True once the logical expiry has been reached.
    pub fn is_expired(&self) -> bool {
        now_epoch_ms() >= self.logical_expire_at_epoch_ms
    }

    pub fn is_fresh(&self) -> bool {
        !self.is_expired()
    }

    /// True for any negative marker, confirmed or presumed.
    pub fn is_negative(&self) -> bool {
        self.data.is_none()
    }

    /// True for a negative marker written after the system of record reported
    /// the entity absent.
    pub fn is_confirmed_negative(&self) -> bool {
        self.is_negative() && !self.presumed
    }
}

impl<T: Serialize> CacheEnvelope<T> {
    /// Serialize for storage in the shared tier.
    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<T: DeserializeOwned> CacheEnvelope<T> {
    /// Deserialize an envelope read from the shared tier.
    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
