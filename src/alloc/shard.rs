//! Shard State
//!
//! Everything a writer mutates when it owns a shard: the block allocator
//! for the shard's arena range and the append-only key-record sequence for
//! the shard's record range.

use std::ops::Range;

use crate::pmem::Layout;

use super::BlockAllocator;

/// Per-shard space management
#[derive(Debug)]
pub struct ShardState {
    id: usize,
    allocator: BlockAllocator,
    records: Range<u32>,
    /// Number of record slots handed out so far
    record_seq: u32,
}

impl ShardState {
    /// Empty shard of a freshly formatted region
    pub fn new(layout: &Layout, id: usize) -> Self {
        Self {
            id,
            allocator: BlockAllocator::new(layout.shard_units(id)),
            records: layout.shard_records(id),
            record_seq: 0,
        }
    }

    /// Shard state rebuilt by recovery
    pub fn recovered(layout: &Layout, id: usize, high_water: u32, record_seq: u32) -> Self {
        let records = layout.shard_records(id);
        let record_seq = record_seq.min(records.end - records.start);
        Self {
            id,
            allocator: BlockAllocator::with_high_water(layout.shard_units(id), high_water),
            records,
            record_seq,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Next free key-record index, or `None` when the shard is full
    pub fn allocate_record(&mut self) -> Option<u32> {
        let index = self.records.start.checked_add(self.record_seq)?;
        if index >= self.records.end {
            return None;
        }
        self.record_seq += 1;
        Some(index)
    }

    /// Hand back the most recently allocated record slot after a failed
    /// insert, keeping the shard's live records a dense prefix
    pub fn release_record(&mut self, index: u32) {
        debug_assert_eq!(Some(index + 1), self.records.start.checked_add(self.record_seq));
        if self.record_seq > 0 && index + 1 == self.records.start + self.record_seq {
            self.record_seq -= 1;
        }
    }

    pub fn allocator(&mut self) -> &mut BlockAllocator {
        &mut self.allocator
    }

    /// Record slots in use
    pub fn record_count(&self) -> u32 {
        self.record_seq
    }

    pub fn high_water(&self) -> u32 {
        self.allocator.high_water()
    }
}
