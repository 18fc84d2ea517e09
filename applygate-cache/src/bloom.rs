//! Negative-lookup bloom filter.
//!
//! Sits in front of the L1 map so lookups for keys that were never
//! inserted return without touching the map. Double hashing over two
//! `DefaultHasher` seeds; bits are atomic so readers never lock. The
//! filter only grows (no deletion), which costs nothing but the odd
//! false positive.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct BloomFilter {
    bits: Vec<AtomicU64>,
    mask: u64,
    hashes: u32,
}

impl BloomFilter {
    /// `bits` is rounded up to a power of two; `hashes` is the number of
    /// probe positions per key.
    pub fn new(bits: usize, hashes: u32) -> Self {
        let words = (bits.next_power_of_two() / 64).max(1);
        Self {
            bits: (0..words).map(|_| AtomicU64::new(0)).collect(),
            mask: (words as u64 * 64) - 1,
            hashes,
        }
    }

    fn probes(&self, key: &str) -> (u64, u64) {
        let mut h1 = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut h1);
        let a = h1.finish();
        let mut h2 = std::collections::hash_map::DefaultHasher::new();
        (key, 0x9e37_79b9_7f4a_7c15u64).hash(&mut h2);
        let b = h2.finish() | 1;
        (a, b)
    }

    pub fn insert(&self, key: &str) {
        let (a, b) = self.probes(key);
        for i in 0..self.hashes as u64 {
            let bit = a.wrapping_add(i.wrapping_mul(b)) & self.mask;
            self.bits[(bit / 64) as usize].fetch_or(1 << (bit % 64), Ordering::Relaxed);
        }
    }

    /// `false` means the key was definitely never inserted.
    pub fn might_contain(&self, key: &str) -> bool {
        let (a, b) = self.probes(key);
        for i in 0..self.hashes as u64 {
            let bit = a.wrapping_add(i.wrapping_mul(b)) & self.mask;
            if self.bits[(bit / 64) as usize].load(Ordering::Relaxed) & (1 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new(1 << 16, 4)
    }
}
