//! Key hashing
//!
//! Keys are fixed 16 bytes, so the hash folds the two little-endian
//! halves through a 64-bit finalizer. Nothing hashed is persisted; the
//! index and filter are rebuilt on every open.

use crate::pmem::Key;

const SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// 64-bit hash of a key
pub fn hash_key(key: &Key) -> u64 {
    let (lo, hi) = halves(key);
    let h = fmix64(lo ^ SEED);
    fmix64(h.rotate_left(31) ^ hi)
}

/// First four key bytes, compared before a full key comparison
pub fn key_prefix(key: &Key) -> u32 {
    u32::from_le_bytes([key[0], key[1], key[2], key[3]])
}

fn halves(key: &Key) -> (u64, u64) {
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&key[..8]);
    hi.copy_from_slice(&key[8..]);
    (u64::from_le_bytes(lo), u64::from_le_bytes(hi))
}

fn fmix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    x ^= x >> 33;
    x = x.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
    x ^ (x >> 33)
}
