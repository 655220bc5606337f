//! TTL and timing budgets for the cache engine.

use std::time::Duration;

use rand::Rng;

/// Every duration the orchestrator honors, in one place.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    /// Maximum number of envelopes held in L1.
    pub local_max_entries: u64,
    /// Physical TTL of L1 entries.
    pub local_ttl: Duration,
    /// Minimum logical TTL of freshly loaded positive envelopes.
    pub logical_ttl_base: Duration,
    /// Width of the random window added on top of the base.
    pub logical_ttl_jitter: Duration,
    /// Physical TTL of positive L2 entries; longer than any logical TTL.
    pub physical_ttl: Duration,
    /// Logical and physical TTL of negative markers.
    pub negative_ttl: Duration,
    pub load_lock_ttl: Duration,
    pub refresh_lock_ttl: Duration,
    /// How long a loser of the load lock waits before re-checking L2.
    pub lock_wait_backoff: Duration,
    /// Delay before the second invalidation round.
    pub double_delete_delay: Duration,
    pub max_background_tasks: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            local_max_entries: 100_000,
            local_ttl: Duration::from_secs(300),
            logical_ttl_base: Duration::from_secs(300),
            logical_ttl_jitter: Duration::from_secs(300),
            physical_ttl: Duration::from_secs(600),
            negative_ttl: Duration::from_secs(30),
            load_lock_ttl: Duration::from_secs(5),
            refresh_lock_ttl: Duration::from_secs(10),
            lock_wait_backoff: Duration::from_millis(50),
            double_delete_delay: Duration::from_millis(300),
            max_background_tasks: 256,
        }
    }
}

impl CachePolicy {
    /// Logical TTL for a fresh positive envelope: base plus jitter drawn from
    /// `[0, jitter)`, so keys loaded together do not expire together.
    pub fn logical_ttl(&self) -> Duration {
        let jitter_ms = self.logical_ttl_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.logical_ttl_base;
        }
        let offset = rand::thread_rng().gen_range(0..jitter_ms);
        self.logical_ttl_base + Duration::from_millis(offset)
    }
}
