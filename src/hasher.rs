use std::hash::Hasher;

/// Initial state of the cdb hash.
pub const HASH_SEED: u32 = 5381;

/// Hashes `key` the way every cdb file indexes its records.
///
/// This is Bernstein's `h = (h * 33) ^ byte` over wrapping 32-bit arithmetic,
/// seeded with [`HASH_SEED`]. Builders and readers must agree on it bit for
/// bit, so it is not configurable.
pub fn hash(key: &[u8]) -> u32 {
    let mut hasher = CdbHasher::default();
    hasher.write(key);
    hasher.value()
}

/// Incremental form of [`hash`].
///
/// Feeding a key in several `write` calls yields the same value as hashing
/// the concatenation in one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdbHasher {
    state: u32,
}

impl Default for CdbHasher {
    fn default() -> Self {
        Self { state: HASH_SEED }
    }
}

impl CdbHasher {
    /// Returns the 32-bit hash of the bytes written so far.
    pub fn value(&self) -> u32 {
        self.state
    }
}

impl Hasher for CdbHasher {
    fn finish(&self) -> u64 {
        self.state as u64
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state = (self.state << 5).wrapping_add(self.state) ^ byte as u32;
        }
    }
}
