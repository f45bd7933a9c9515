//! Layout Manager
//!
//! Partitions the region and owns the persisted meta header. The
//! partitioning is a pure function of (total size, shard count, record
//! capacity), so every open recomputes identical offsets.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{NvkvError, Result};

use super::record::{LARGE_BLOCK_SIZE, RECORD_SIZE, SMALL_BLOCK_SIZE, UNIT_SIZE};
use super::region::BackingStore;

/// Bytes reserved for the meta header at the start of the region
pub const META_SIZE: usize = 4096;

/// Alignment of the value arena
pub const ARENA_ALIGN: usize = 4096;

/// Magic number identifying an nvkv region ("NVKVREGN")
pub const MAGIC: u64 = 0x4E56_4B56_5245_474E;

/// Current on-media format version
pub const FORMAT_VERSION: u32 = 1;

/// Header prefix: PayloadLen (4) + CRC32 (4)
const META_PREFIX: usize = 8;

/// Geometry persisted in the first page of the region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaHeader {
    pub magic: u64,
    pub version: u32,
    pub total_size: u64,
    pub shard_count: u32,
    pub record_capacity: u64,
    pub record_size: u32,
    pub small_block: u32,
    pub large_block: u32,
}

/// Offsets of the three areas of the region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub total_size: usize,
    pub shard_count: usize,
    pub records_per_shard: usize,
    pub record_table_offset: usize,
    pub arena_offset: usize,
    pub units_per_shard: usize,
}

impl Layout {
    /// Compute the partitioning for a region
    ///
    /// `record_capacity` is rounded down to a multiple of `shard_count`.
    pub fn compute(total_size: usize, shard_count: usize, record_capacity: usize) -> Result<Self> {
        if shard_count == 0 {
            return Err(NvkvError::Config("shard_count must be at least 1".into()));
        }

        let records_per_shard = record_capacity / shard_count;
        if records_per_shard == 0 {
            return Err(NvkvError::Config(format!(
                "record_capacity {} leaves no records for {} shards",
                record_capacity, shard_count
            )));
        }

        let record_table_offset = align_up(META_SIZE, RECORD_SIZE);
        let record_table_len = records_per_shard * shard_count * RECORD_SIZE;
        let arena_offset = align_up(record_table_offset + record_table_len, ARENA_ALIGN);
        if arena_offset >= total_size {
            return Err(NvkvError::Config(format!(
                "region of {} bytes cannot hold {} records",
                total_size,
                records_per_shard * shard_count
            )));
        }

        let arena_units = (total_size - arena_offset) / UNIT_SIZE;
        let units_per_shard = arena_units / shard_count;
        if units_per_shard < LARGE_BLOCK_SIZE / UNIT_SIZE {
            return Err(NvkvError::Config(format!(
                "value arena of {} units is too small for {} shards",
                arena_units, shard_count
            )));
        }
        if (units_per_shard * shard_count) as u64 >= u32::MAX as u64 {
            return Err(NvkvError::Config(format!(
                "value arena of {} units exceeds 32-bit block ids",
                units_per_shard * shard_count
            )));
        }

        Ok(Self {
            total_size,
            shard_count,
            records_per_shard,
            record_table_offset,
            arena_offset,
            units_per_shard,
        })
    }

    /// Number of key records across all shards
    pub fn record_capacity(&self) -> usize {
        self.records_per_shard * self.shard_count
    }

    /// Byte offset of record `index`
    pub fn record_offset(&self, index: u32) -> usize {
        self.record_table_offset + index as usize * RECORD_SIZE
    }

    /// Byte offset of arena unit `unit`
    pub fn unit_offset(&self, unit: u32) -> usize {
        self.arena_offset + unit as usize * UNIT_SIZE
    }

    /// Record indices owned by `shard`
    pub fn shard_records(&self, shard: usize) -> Range<u32> {
        let start = shard * self.records_per_shard;
        start as u32..(start + self.records_per_shard) as u32
    }

    /// Arena units owned by `shard`
    pub fn shard_units(&self, shard: usize) -> Range<u32> {
        let start = shard * self.units_per_shard;
        start as u32..(start + self.units_per_shard) as u32
    }

    /// Units in the whole value arena
    pub fn arena_units(&self) -> u32 {
        (self.units_per_shard * self.shard_count) as u32
    }

    /// Whether a block of `units` starting at `id` lies inside the arena
    pub fn contains_block(&self, id: u32, units: u32) -> bool {
        id.checked_add(units)
            .map_or(false, |end| end <= self.arena_units())
    }

    /// Arena shard that owns `unit`
    pub fn arena_shard_of(&self, unit: u32) -> usize {
        (unit as usize / self.units_per_shard).min(self.shard_count - 1)
    }

    /// Header describing this geometry
    pub fn meta_header(&self) -> MetaHeader {
        MetaHeader {
            magic: MAGIC,
            version: FORMAT_VERSION,
            total_size: self.total_size as u64,
            shard_count: self.shard_count as u32,
            record_capacity: self.record_capacity() as u64,
            record_size: RECORD_SIZE as u32,
            small_block: SMALL_BLOCK_SIZE as u32,
            large_block: LARGE_BLOCK_SIZE as u32,
        }
    }

    /// Write and persist the meta header (marks the region as formatted)
    pub fn format(&self, store: &BackingStore) -> Result<()> {
        let payload = bincode::serialize(&self.meta_header())?;
        if payload.len() > META_SIZE - META_PREFIX {
            return Err(NvkvError::Serialization(format!(
                "meta header of {} bytes does not fit",
                payload.len()
            )));
        }

        let crc = crc32fast::hash(&payload);
        let mut page = vec![0u8; META_SIZE];
        page[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        page[4..8].copy_from_slice(&crc.to_le_bytes());
        page[META_PREFIX..META_PREFIX + payload.len()].copy_from_slice(&payload);

        store.write(0, &page);
        store.persist(0, META_SIZE)?;
        store.drain();
        Ok(())
    }

    /// Read the meta header; `None` if the region was never formatted
    pub fn load_header(store: &BackingStore) -> Result<Option<MetaHeader>> {
        let mut page = vec![0u8; META_SIZE];
        store.read(0, &mut page);

        if page.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        let len = u32::from_le_bytes([page[0], page[1], page[2], page[3]]) as usize;
        let crc = u32::from_le_bytes([page[4], page[5], page[6], page[7]]);
        if len == 0 || len > META_SIZE - META_PREFIX {
            return Err(NvkvError::Corrupted(format!(
                "meta header length {} out of range",
                len
            )));
        }

        let payload = &page[META_PREFIX..META_PREFIX + len];
        let actual = crc32fast::hash(payload);
        if actual != crc {
            return Err(NvkvError::Corrupted(format!(
                "meta header checksum mismatch: stored {:#010x}, computed {:#010x}",
                crc, actual
            )));
        }

        let header: MetaHeader = bincode::deserialize(payload)?;
        if header.magic != MAGIC {
            return Err(NvkvError::Corrupted(format!(
                "invalid magic {:#018x}",
                header.magic
            )));
        }
        if header.version != FORMAT_VERSION {
            return Err(NvkvError::Corrupted(format!(
                "unsupported format version {}",
                header.version
            )));
        }

        Ok(Some(header))
    }

    /// Check a persisted header against this geometry
    pub fn verify(&self, header: &MetaHeader) -> Result<()> {
        let expected = self.meta_header();
        if *header == expected {
            return Ok(());
        }

        let mut diffs = Vec::new();
        if header.total_size != expected.total_size {
            diffs.push(format!("total_size {} != {}", header.total_size, expected.total_size));
        }
        if header.shard_count != expected.shard_count {
            diffs.push(format!("shard_count {} != {}", header.shard_count, expected.shard_count));
        }
        if header.record_capacity != expected.record_capacity {
            diffs.push(format!(
                "record_capacity {} != {}",
                header.record_capacity, expected.record_capacity
            ));
        }
        if header.record_size != expected.record_size
            || header.small_block != expected.small_block
            || header.large_block != expected.large_block
        {
            diffs.push("record/block sizes differ".to_string());
        }
        Err(NvkvError::LayoutMismatch(diffs.join(", ")))
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}
