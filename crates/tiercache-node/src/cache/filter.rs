//! Existence filter guarding the system of record against penetration.
//!
//! A Bloom filter answers "definitely absent" or "possibly present" with no
//! false negatives. It only grows: ids can be added but never removed, so its
//! false-positive rate drifts upward as entities are deleted. An external job
//! periodically builds a fresh filter from the system of record and swaps it
//! in with [`ExistenceFilter::replace`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;

/// Fixed-size Bloom filter with lock-free inserts.
///
/// Bits live in atomic words so `add` and `might_contain` can run concurrently
/// from many tasks without a lock.
#[derive(Debug)]
pub struct BloomFilter {
    words: Box<[AtomicU64]>,
    num_bits: u64,
    num_hashes: u32,
    inserted: AtomicU64,
}

impl BloomFilter {
    /// Size a filter for `expected_items` at the target false-positive rate.
    ///
    /// Uses the standard optimum `m = -n ln p / (ln 2)^2`, `k = (m / n) ln 2`.
    pub fn with_rate(expected_items: u64, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, 32.0) as u32;
        Self::with_dimensions(num_bits, num_hashes)
    }

    /// Build a filter with an explicit bit count and hash count.
    fn with_dimensions(num_bits: u64, num_hashes: u32) -> Self {
        let num_words = num_bits.div_ceil(64).max(1);
        let words = (0..num_words).map(|_| AtomicU64::new(0)).collect();
        Self {
            words,
            num_bits: num_words * 64,
            num_hashes: num_hashes.max(1),
            inserted: AtomicU64::new(0),
        }
    }

    /// Build a filter and populate it from an id source, as a rebuild job does.
    pub fn from_items<'a, H, I>(items: I, expected_items: u64, false_positive_rate: f64) -> Self
    where
        H: Hash + ?Sized + 'a,
        I: IntoIterator<Item = &'a H>,
    {
        let filter = Self::with_rate(expected_items, false_positive_rate);
        for item in items {
            filter.add(item);
        }
        filter
    }

    pub fn add<H: Hash + ?Sized>(&self, item: &H) {
        for bit in self.bit_positions(item) {
            let (word, mask) = Self::locate(bit);
            self.words[word].fetch_or(mask, Ordering::Relaxed);
        }
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    /// `false` means the item was definitely never added.
    pub fn might_contain<H: Hash + ?Sized>(&self, item: &H) -> bool {
        self.bit_positions(item).all(|bit| {
            let (word, mask) = Self::locate(bit);
            self.words[word].load(Ordering::Relaxed) & mask != 0
        })
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Number of `add` calls, duplicates included.
    pub fn insert_count(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    // Kirsch-Mitzenmacher double hashing: g_i(x) = h1(x) + i * h2(x)
    fn bit_positions<H: Hash + ?Sized>(&self, item: &H) -> impl Iterator<Item = u64> {
        let h1 = seeded_hash(0x51_7c_c1_b7, item);
        let h2 = seeded_hash(0x27_22_0a_95, item) | 1;
        let num_bits = self.num_bits;
        (0..u64::from(self.num_hashes))
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }

    #[inline]
    fn locate(bit: u64) -> (usize, u64) {
        ((bit / 64) as usize, 1u64 << (bit % 64))
    }
}

fn seeded_hash<H: Hash + ?Sized>(seed: u64, item: &H) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    item.hash(&mut hasher);
    hasher.finish()
}

/// Shared handle to the current Bloom filter.
///
/// Reads never block: [`replace`](Self::replace) swaps the whole filter
/// atomically, and in-flight readers keep using the snapshot they loaded.
#[derive(Debug)]
pub struct ExistenceFilter {
    current: ArcSwap<BloomFilter>,
}

impl ExistenceFilter {
    pub fn new(filter: BloomFilter) -> Self {
        Self {
            current: ArcSwap::from_pointee(filter),
        }
    }

    /// Empty filter sized for `expected_items` at `false_positive_rate`.
    pub fn with_rate(expected_items: u64, false_positive_rate: f64) -> Self {
        Self::new(BloomFilter::with_rate(expected_items, false_positive_rate))
    }

    /// No false negatives: `false` means the id was never added.
    pub fn might_contain<H: Hash + ?Sized>(&self, id: &H) -> bool {
        self.current.load().might_contain(id)
    }

    /// Record an id confirmed to exist in the system of record.
    pub fn add<H: Hash + ?Sized>(&self, id: &H) {
        self.current.load().add(id);
    }

    /// Swap in a wholesale rebuilt filter.
    pub fn replace(&self, filter: BloomFilter) {
        self.current.store(Arc::new(filter));
        tracing::info!("existence filter replaced");
    }

    /// The filter currently in use.
    pub fn snapshot(&self) -> Arc<BloomFilter> {
        self.current.load_full()
    }
}
