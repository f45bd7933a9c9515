//! Key Record and Value Block codec
//!
//! ## Record Format (64 bytes, one cache line)
//! ```text
//! ┌──────────┬──────────────┬───────────────────┬───────────────────┬─────────┐
//! │ Key (16) │ Header (8)   │ Primary set (16)  │ Secondary set(16) │ Pad (8) │
//! └──────────┴──────────────┴───────────────────┴───────────────────┴─────────┘
//! Header word: Len u32 (bits 0..32) | Flags u8 (bits 32..40) | reserved
//!   Flags: bit 0 = active set (0 primary, 1 secondary), bit 1 = live
//! Block set:   4 × u32 LE unit indices
//! ```
//!
//! The header word is the only field written atomically. An update stages
//! blocks and the inactive set first, then publishes by storing a header
//! word that flips the active set.

use crate::error::Result;

use super::layout::Layout;
use super::region::BackingStore;

/// Key length in bytes
pub const KEY_SIZE: usize = 16;

/// Size of an encoded key record
pub const RECORD_SIZE: usize = 64;

/// Allocation granule of the value arena
pub const UNIT_SIZE: usize = 128;

pub const SMALL_BLOCK_SIZE: usize = UNIT_SIZE;
pub const LARGE_BLOCK_SIZE: usize = 2 * UNIT_SIZE;

/// Block pointers per buffer
pub const BLOCKS_PER_SET: usize = 4;

/// Largest storable value
pub const MAX_VALUE_LEN: usize = BLOCKS_PER_SET * LARGE_BLOCK_SIZE;

pub type Key = [u8; KEY_SIZE];

/// Arena unit index of the first unit of a block
pub type BlockId = u32;

const HEADER_OFFSET: usize = KEY_SIZE;
const SETS_OFFSET: usize = HEADER_OFFSET + 8;
const SET_BYTES: usize = BLOCKS_PER_SET * 4;

const FLAG_SECONDARY: u64 = 0b01;
const FLAG_LIVE: u64 = 0b10;

/// One of the two pointer sets of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSlot {
    Primary,
    Secondary,
}

impl BufferSlot {
    pub fn other(self) -> Self {
        match self {
            BufferSlot::Primary => BufferSlot::Secondary,
            BufferSlot::Secondary => BufferSlot::Primary,
        }
    }

    fn offset(self) -> usize {
        match self {
            BufferSlot::Primary => SETS_OFFSET,
            BufferSlot::Secondary => SETS_OFFSET + SET_BYTES,
        }
    }
}

/// Decoded header word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub len: u32,
    pub active: BufferSlot,
    pub live: bool,
}

impl RecordHeader {
    pub fn live(len: u32, active: BufferSlot) -> Self {
        Self {
            len,
            active,
            live: true,
        }
    }

    pub fn encode(self) -> u64 {
        let mut flags = 0;
        if self.active == BufferSlot::Secondary {
            flags |= FLAG_SECONDARY;
        }
        if self.live {
            flags |= FLAG_LIVE;
        }
        self.len as u64 | (flags << 32)
    }

    pub fn decode(word: u64) -> Self {
        let flags = word >> 32;
        Self {
            len: word as u32,
            active: if flags & FLAG_SECONDARY != 0 {
                BufferSlot::Secondary
            } else {
                BufferSlot::Primary
            },
            live: flags & FLAG_LIVE != 0,
        }
    }
}

/// Size class of a value block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSize {
    Small,
    Large,
}

impl BlockSize {
    pub fn units(self) -> u32 {
        match self {
            BlockSize::Small => 1,
            BlockSize::Large => 2,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            BlockSize::Small => SMALL_BLOCK_SIZE,
            BlockSize::Large => LARGE_BLOCK_SIZE,
        }
    }
}

/// Greedy block sizes covering a value: large blocks first, then one
/// small block if the remainder fits in it, otherwise one more large.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPlan {
    sizes: [BlockSize; BLOCKS_PER_SET],
    count: usize,
}

impl BlockPlan {
    /// Plan for a value of `len` bytes (`len <= MAX_VALUE_LEN`)
    pub fn for_len(len: usize) -> Self {
        debug_assert!(len <= MAX_VALUE_LEN);
        let mut sizes = [BlockSize::Large; BLOCKS_PER_SET];
        let mut count = len / LARGE_BLOCK_SIZE;
        let rem = len % LARGE_BLOCK_SIZE;
        if rem > 0 {
            sizes[count] = if rem <= SMALL_BLOCK_SIZE {
                BlockSize::Small
            } else {
                BlockSize::Large
            };
            count += 1;
        }
        Self { sizes, count }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn sizes(&self) -> &[BlockSize] {
        &self.sizes[..self.count]
    }

    /// Total arena units the plan occupies
    pub fn units(&self) -> u32 {
        self.sizes().iter().map(|s| s.units()).sum()
    }
}

/// Block pointers of one buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockSet {
    ids: [BlockId; BLOCKS_PER_SET],
}

impl BlockSet {
    pub fn new(ids: [BlockId; BLOCKS_PER_SET]) -> Self {
        Self { ids }
    }

    pub fn get(&self, i: usize) -> BlockId {
        self.ids[i]
    }

    pub fn set(&mut self, i: usize, id: BlockId) {
        self.ids[i] = id;
    }

    /// The blocks a value of `len` bytes occupies, with their sizes
    pub fn blocks(&self, len: usize) -> impl Iterator<Item = (BlockId, BlockSize)> + '_ {
        let plan = BlockPlan::for_len(len);
        self.ids
            .iter()
            .copied()
            .zip(plan.sizes)
            .take(plan.count)
    }

    fn encode(&self) -> [u8; SET_BYTES] {
        let mut buf = [0u8; SET_BYTES];
        for (chunk, id) in buf.chunks_exact_mut(4).zip(self.ids) {
            chunk.copy_from_slice(&id.to_le_bytes());
        }
        buf
    }

    fn decode(buf: &[u8; SET_BYTES]) -> Self {
        let mut ids = [0; BLOCKS_PER_SET];
        for (id, chunk) in ids.iter_mut().zip(buf.chunks_exact(4)) {
            *id = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self { ids }
    }
}

/// Accessor for one key record in the mapped table
pub struct RecordView<'a> {
    store: &'a BackingStore,
    offset: usize,
}

impl<'a> RecordView<'a> {
    pub fn new(store: &'a BackingStore, layout: &Layout, index: u32) -> Self {
        Self {
            store,
            offset: layout.record_offset(index),
        }
    }

    pub fn key(&self) -> Key {
        let mut key = [0u8; KEY_SIZE];
        self.store.read(self.offset, &mut key);
        key
    }

    pub fn key_eq(&self, key: &Key) -> bool {
        self.key() == *key
    }

    pub fn header(&self) -> RecordHeader {
        RecordHeader::decode(self.store.load_u64(self.offset + HEADER_OFFSET))
    }

    pub fn block_set(&self, slot: BufferSlot) -> BlockSet {
        let mut buf = [0u8; SET_BYTES];
        self.store.read(self.offset + slot.offset(), &mut buf);
        BlockSet::decode(&buf)
    }

    pub fn write_key(&self, key: &Key) {
        self.store.write(self.offset, key);
    }

    pub fn write_block_set(&self, slot: BufferSlot, set: &BlockSet) {
        self.store.write(self.offset + slot.offset(), &set.encode());
    }

    /// Persist the key and both block sets (everything but the header word)
    pub fn persist_body(&self) -> Result<()> {
        self.store.persist(self.offset, RECORD_SIZE)?;
        self.store.drain();
        Ok(())
    }

    /// Store and persist a new header word. This is the commit point of
    /// both inserts and updates.
    pub fn publish(&self, header: RecordHeader) -> Result<()> {
        self.store
            .store_u64(self.offset + HEADER_OFFSET, header.encode());
        self.store.persist(self.offset + HEADER_OFFSET, 8)?;
        self.store.drain();
        Ok(())
    }

    /// Clear the header word of a record whose insert was abandoned after
    /// `publish`, so recovery treats it as the end of the shard
    pub fn retract(&self) -> Result<()> {
        self.store.store_u64(self.offset + HEADER_OFFSET, 0);
        self.store.persist(self.offset + HEADER_OFFSET, 8)?;
        self.store.drain();
        Ok(())
    }
}

/// Copy `value` into the blocks of `set` and make them durable
pub fn write_value(
    store: &BackingStore,
    layout: &Layout,
    set: &BlockSet,
    value: &[u8],
) -> Result<()> {
    let mut rest = value;
    for (id, size) in set.blocks(value.len()) {
        let n = rest.len().min(size.bytes());
        let offset = layout.unit_offset(id);
        store.write(offset, &rest[..n]);
        store.persist(offset, n)?;
        rest = &rest[n..];
    }
    store.drain();
    Ok(())
}

/// Copy a value of `len` bytes out of the blocks of `set`
///
/// Returns `None` if `len` or any block id is out of range, which only
/// happens when the set was read while a writer was rewriting it.
pub fn read_value(
    store: &BackingStore,
    layout: &Layout,
    set: &BlockSet,
    len: usize,
) -> Option<Vec<u8>> {
    if len > MAX_VALUE_LEN {
        return None;
    }
    let mut value = vec![0u8; len];
    let mut pos = 0;
    for (id, size) in set.blocks(len) {
        if !layout.contains_block(id, size.units()) {
            return None;
        }
        let n = (len - pos).min(size.bytes());
        store.read(layout.unit_offset(id), &mut value[pos..pos + n]);
        pos += n;
    }
    Some(value)
}
