//! Hash Index
//!
//! Lock-free open addressing with linear probing. Each slot is one
//! `AtomicU64` packing the key prefix and the record index:
//!
//! ```text
//! ┌─────────────────────┬──────────────────────────┐
//! │ Prefix u32 (63..32) │ Record index + 1 (31..0) │
//! └─────────────────────┴──────────────────────────┘
//! ```
//!
//! A zero word is an empty slot. Entries are never removed, so an empty
//! slot ends every probe chain that passes through it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{NvkvError, Result};

const EMPTY: u64 = 0;

/// Concurrent map from key hash to key-record index
pub struct HashIndex {
    slots: Box<[AtomicU64]>,
    mask: usize,
    len: AtomicUsize,
}

impl HashIndex {
    /// Index able to hold `max_keys` entries at a load factor of at most 0.5
    pub fn new(max_keys: usize) -> Self {
        let capacity = max_keys.max(1).saturating_mul(2).next_power_of_two();
        let slots = (0..capacity).map(|_| AtomicU64::new(EMPTY)).collect();
        Self {
            slots,
            mask: capacity - 1,
            len: AtomicUsize::new(0),
        }
    }

    /// Claim the first empty slot at or after `hash % capacity`
    ///
    /// Never blocks. Fails with `IndexFull` only if every slot is taken,
    /// which the sizing rule excludes.
    pub fn insert(&self, hash: u64, prefix: u32, record: u32) -> Result<()> {
        let entry = pack(prefix, record);
        let mut pos = hash as usize & self.mask;

        for _ in 0..self.slots.len() {
            let slot = &self.slots[pos];
            if slot.load(Ordering::Relaxed) == EMPTY
                && slot
                    .compare_exchange(EMPTY, entry, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
            {
                self.len.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            pos = (pos + 1) & self.mask;
        }

        Err(NvkvError::IndexFull)
    }

    /// Find the record whose prefix matches and for which `key_eq` holds
    ///
    /// `key_eq` receives a record index and compares the full key.
    pub fn search<F>(&self, hash: u64, prefix: u32, mut key_eq: F) -> Option<u32>
    where
        F: FnMut(u32) -> bool,
    {
        let mut pos = hash as usize & self.mask;

        for _ in 0..self.slots.len() {
            let word = self.slots[pos].load(Ordering::Acquire);
            if word == EMPTY {
                return None;
            }
            let (entry_prefix, record) = unpack(word);
            if entry_prefix == prefix && key_eq(record) {
                return Some(record);
            }
            pos = (pos + 1) & self.mask;
        }

        None
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of entries inserted
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn pack(prefix: u32, record: u32) -> u64 {
    debug_assert!(record < u32::MAX);
    ((prefix as u64) << 32) | (record as u64 + 1)
}

fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, (word as u32).wrapping_sub(1))
}
