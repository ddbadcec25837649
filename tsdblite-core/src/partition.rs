//! Key to shard routing

use xxhash_rust::xxh64::xxh64;

/// Seed for the shard hash. Must never change: shard assignment is a pure
/// function of the key and is recomputed on every access.
const SHARD_HASH_SEED: u64 = 0;

/// Maps canonical keys onto a fixed number of shards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    shard_count: usize,
}

impl Partitioner {
    /// Create a partitioner over `shard_count` shards (must be non-zero)
    pub fn new(shard_count: usize) -> Self {
        debug_assert!(shard_count > 0, "shard count must be non-zero");
        Self { shard_count }
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Shard index for a canonical key
    pub fn shard_for(&self, key: &str) -> usize {
        (hash_key(key) % self.shard_count as u64) as usize
    }
}

/// 64-bit hash of a canonical key
fn hash_key(key: &str) -> u64 {
    xxh64(key.as_bytes(), SHARD_HASH_SEED)
}
