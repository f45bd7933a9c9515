//! Per-record version counters
//!
//! A sequence lock per key record. Even values are stable; a writer moves
//! the counter to odd while it rewrites the record and to the next even
//! value when the new header word is published. Readers copy the value out
//! and retry if the counter moved underneath them.
//!
//! Versions are volatile. They start at zero on every open, which is safe
//! because read caches never outlive the engine.

use std::sync::atomic::{fence, AtomicU64, Ordering};

use crossbeam::utils::Backoff;

pub(crate) struct VersionTable {
    versions: Box<[AtomicU64]>,
}

impl VersionTable {
    pub fn new(records: usize) -> Self {
        Self {
            versions: (0..records).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Current version, waiting out any writer in progress
    pub fn stable(&self, record: u32) -> u64 {
        let slot = &self.versions[record as usize];
        let backoff = Backoff::new();
        loop {
            let v = slot.load(Ordering::Acquire);
            if v & 1 == 0 {
                return v;
            }
            backoff.snooze();
        }
    }

    /// True if nothing was committed since `seen` was observed
    pub fn validate(&self, record: u32, seen: u64) -> bool {
        fence(Ordering::Acquire);
        self.versions[record as usize].load(Ordering::Relaxed) == seen
    }

    /// Enter the write side for `record`
    pub fn lock(&self, record: u32) -> VersionGuard<'_> {
        let slot = &self.versions[record as usize];
        let backoff = Backoff::new();
        loop {
            let v = slot.load(Ordering::Relaxed);
            if v & 1 == 0
                && slot
                    .compare_exchange_weak(v, v + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                fence(Ordering::Release);
                return VersionGuard {
                    slot,
                    start: v,
                    committed: false,
                };
            }
            backoff.snooze();
        }
    }
}

/// Write side of a record's sequence lock
///
/// Dropping without `commit` restores the starting version, so readers and
/// caches that saw it stay valid.
pub(crate) struct VersionGuard<'a> {
    slot: &'a AtomicU64,
    start: u64,
    committed: bool,
}

impl VersionGuard<'_> {
    /// Release with a new version
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for VersionGuard<'_> {
    fn drop(&mut self) {
        let next = if self.committed {
            self.start + 2
        } else {
            self.start
        };
        self.slot.store(next, Ordering::Release);
    }
}
