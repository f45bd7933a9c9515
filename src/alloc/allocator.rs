//! Block Allocator
//!
//! Bump allocation inside one shard's arena range, with LIFO free lists
//! per block size. Not thread safe; the owning `ShardState` sits behind a
//! mutex.

use std::ops::Range;

use crate::pmem::{BlockId, BlockPlan, BlockSet, BlockSize};

/// Allocator for one arena shard
#[derive(Debug)]
pub struct BlockAllocator {
    /// Units this allocator may hand out
    range: Range<u32>,
    /// Next never-allocated unit (absolute)
    high_water: u32,
    small_free: Vec<BlockId>,
    large_free: Vec<BlockId>,
}

impl BlockAllocator {
    /// Fresh allocator over `range`
    pub fn new(range: Range<u32>) -> Self {
        let start = range.start;
        Self::with_high_water(range, start)
    }

    /// Allocator resuming at `high_water` (clamped into `range`)
    pub fn with_high_water(range: Range<u32>, high_water: u32) -> Self {
        let high_water = high_water.clamp(range.start, range.end);
        Self {
            range,
            high_water,
            small_free: Vec::new(),
            large_free: Vec::new(),
        }
    }

    pub fn allocate_small(&mut self) -> Option<BlockId> {
        self.allocate(BlockSize::Small)
    }

    pub fn allocate_large(&mut self) -> Option<BlockId> {
        self.allocate(BlockSize::Large)
    }

    pub fn recycle_small(&mut self, id: BlockId) {
        self.recycle(id, BlockSize::Small)
    }

    pub fn recycle_large(&mut self, id: BlockId) {
        self.recycle(id, BlockSize::Large)
    }

    /// Allocate one block, free list first
    pub fn allocate(&mut self, size: BlockSize) -> Option<BlockId> {
        let free = match size {
            BlockSize::Small => &mut self.small_free,
            BlockSize::Large => &mut self.large_free,
        };
        if let Some(id) = free.pop() {
            return Some(id);
        }

        let end = self.high_water.checked_add(size.units())?;
        if end > self.range.end {
            return None;
        }
        let id = self.high_water;
        self.high_water = end;
        Some(id)
    }

    /// Return a block to its free list. Ownership is not validated.
    pub fn recycle(&mut self, id: BlockId, size: BlockSize) {
        let free = match size {
            BlockSize::Small => &mut self.small_free,
            BlockSize::Large => &mut self.large_free,
        };
        debug_assert!(!free.contains(&id), "block {} recycled twice", id);
        free.push(id);
    }

    /// Allocate every block a value of `len` bytes needs, or none of them
    pub fn allocate_value(&mut self, len: usize) -> Option<BlockSet> {
        let plan = BlockPlan::for_len(len);
        let mut set = BlockSet::default();

        for (i, &size) in plan.sizes().iter().enumerate() {
            match self.allocate(size) {
                Some(id) => set.set(i, id),
                None => {
                    // Hand back what we took, in reverse so the free
                    // lists look as they did before.
                    for j in (0..i).rev() {
                        self.recycle(set.get(j), plan.sizes()[j]);
                    }
                    return None;
                }
            }
        }
        Some(set)
    }

    /// Recycle the blocks of a value of `len` bytes held in `set`
    pub fn recycle_value(&mut self, set: &BlockSet, len: usize) {
        for (id, size) in set.blocks(len) {
            self.recycle(id, size);
        }
    }

    /// Next never-allocated unit (absolute)
    pub fn high_water(&self) -> u32 {
        self.high_water
    }

    pub fn range(&self) -> Range<u32> {
        self.range.clone()
    }

    pub fn free_small(&self) -> usize {
        self.small_free.len()
    }

    pub fn free_large(&self) -> usize {
        self.large_free.len()
    }

    /// Units obtainable without touching the free lists
    pub fn available_units(&self) -> u32 {
        self.range.end - self.high_water
    }
}
