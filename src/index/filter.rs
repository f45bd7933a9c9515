//! Existence Filter
//!
//! One bit per filter slot, set on first insert and never cleared. A clear
//! bit proves the hash was never inserted; a set bit only says "maybe".

use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrent set-only bitmap over key hashes
pub struct ExistenceFilter {
    words: Box<[AtomicU64]>,
    mask: usize,
}

impl ExistenceFilter {
    /// Filter with at least `bits` slots (rounded up to a power of two, min 64)
    pub fn new(bits: usize) -> Self {
        let bits = bits.max(64).next_power_of_two();
        let words = (0..bits / 64).map(|_| AtomicU64::new(0)).collect();
        Self {
            words,
            mask: bits - 1,
        }
    }

    /// False only if `set(hash)` was never called
    pub fn test(&self, hash: u64) -> bool {
        let (word, bit) = self.locate(hash);
        self.words[word].load(Ordering::Acquire) & bit != 0
    }

    pub fn set(&self, hash: u64) {
        let (word, bit) = self.locate(hash);
        self.words[word].fetch_or(bit, Ordering::Release);
    }

    /// Number of slots
    pub fn bits(&self) -> usize {
        self.mask + 1
    }

    /// Number of set bits
    pub fn count_ones(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    fn locate(&self, hash: u64) -> (usize, u64) {
        let slot = hash as usize & self.mask;
        (slot / 64, 1u64 << (slot % 64))
    }
}
