//! Recovery Module
//!
//! Rebuilds the volatile structures of an engine from a region that
//! already holds records.
//!
//! ## Responsibilities
//! - Scan every shard's record range in parallel (fork-join)
//! - Re-insert every live key into the hash index and existence filter
//! - Restore each shard's key-record sequence
//! - Restore each allocator's high-water mark from the blocks referenced
//!
//! ## State Machine
//! ```text
//! Closed ──▶ Scanning ──▶ IndexRebuilt ──▶ Ready
//! ```
//!
//! No checksums are verified. The high-water mark is set
//! `RECOVERY_SLACK_UNITS` past the highest referenced block end so that a
//! block written by an update in flight at crash time is never handed out
//! again.

mod scan;

use std::time::{Duration, Instant};

use crate::alloc::ShardState;
use crate::error::{NvkvError, Result};
use crate::index::{ExistenceFilter, HashIndex};
use crate::pmem::{BackingStore, Layout};

use scan::{scan_shard, ShardScan};

/// Units left unused past the highest referenced block
pub const RECOVERY_SLACK_UNITS: u32 = 2;

/// Phases of a recovery run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Closed,
    Scanning,
    IndexRebuilt,
    Ready,
}

/// Outcome of a recovery run
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    /// Live records found across all shards
    pub records: u64,
    /// Live records per shard
    pub per_shard_records: Vec<u32>,
    /// Reconstructed allocator high-water mark per shard (absolute unit)
    pub high_water: Vec<u32>,
    pub elapsed: Duration,
}

/// Drives one recovery run over an opened region
pub struct RecoveryManager<'a> {
    store: &'a BackingStore,
    layout: &'a Layout,
    index: &'a HashIndex,
    filter: &'a ExistenceFilter,
    state: RecoveryState,
}

impl<'a> RecoveryManager<'a> {
    pub fn new(
        store: &'a BackingStore,
        layout: &'a Layout,
        index: &'a HashIndex,
        filter: &'a ExistenceFilter,
    ) -> Self {
        Self {
            store,
            layout,
            index,
            filter,
            state: RecoveryState::Closed,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Scan, rebuild and return the recovered shard states
    pub fn run(&mut self) -> Result<(Vec<ShardState>, RecoveryReport)> {
        let started = Instant::now();

        self.transition(RecoveryState::Scanning);
        let scans = self.scan_all()?;

        self.transition(RecoveryState::IndexRebuilt);
        let (shards, report) = self.rebuild_shards(&scans, started.elapsed());

        self.transition(RecoveryState::Ready);
        tracing::info!(
            records = report.records,
            shards = shards.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "recovery complete"
        );

        Ok((shards, report))
    }

    /// One scanning task per shard; joins before returning
    fn scan_all(&self) -> Result<Vec<ShardScan>> {
        let (store, layout, index, filter) = (self.store, self.layout, self.index, self.filter);

        let joined = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = (0..layout.shard_count)
                .map(|shard| s.spawn(move |_| scan_shard(store, layout, index, filter, shard)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join())
                .collect::<Vec<_>>()
        })
        .map_err(|_| NvkvError::Corrupted("recovery scan panicked".into()))?;

        let mut scans = Vec::with_capacity(joined.len());
        for result in joined {
            let scan = result
                .map_err(|_| NvkvError::Corrupted("recovery scan panicked".into()))??;
            scans.push(scan);
        }
        scans.sort_by_key(|scan| scan.shard);
        Ok(scans)
    }

    fn rebuild_shards(&self, scans: &[ShardScan], elapsed: Duration) -> (Vec<ShardState>, RecoveryReport) {
        let n = self.layout.shard_count;

        // Blocks of a record may live in any arena shard (updates allocate
        // from the updating worker's shard), so merge across all scans.
        let mut max_end: Vec<Option<u32>> = vec![None; n];
        for scan in scans {
            for (merged, observed) in max_end.iter_mut().zip(&scan.max_end) {
                *merged = match (*merged, *observed) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
            }
        }

        let mut shards = Vec::with_capacity(n);
        let mut high_water = Vec::with_capacity(n);
        let mut per_shard_records = Vec::with_capacity(n);

        for (shard, scan) in scans.iter().enumerate() {
            let units = self.layout.shard_units(shard);
            let hw = match max_end[shard] {
                Some(end) => end.saturating_add(RECOVERY_SLACK_UNITS),
                None => units.start,
            };
            let state = ShardState::recovered(self.layout, shard, hw, scan.records);
            high_water.push(state.high_water());
            per_shard_records.push(state.record_count());
            shards.push(state);
        }

        let report = RecoveryReport {
            records: per_shard_records.iter().map(|&r| r as u64).sum(),
            per_shard_records,
            high_water,
            elapsed,
        };
        (shards, report)
    }

    fn transition(&mut self, next: RecoveryState) {
        tracing::debug!(from = ?self.state, to = ?next, "recovery state");
        self.state = next;
    }
}
