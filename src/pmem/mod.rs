//! Persistent Memory Module
//!
//! The mapped backing store and everything that gives its bytes meaning.
//!
//! ## Responsibilities
//! - Map a fixed-size file (or anonymous region) into the process
//! - Durable-write (`persist`) and ordering (`drain`) primitives
//! - Partition the region into meta header, record table and value arena
//! - Encode/decode key records and value blocks
//!
//! ## Region Format
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Meta Header (4096 bytes)                                 │
//! │   PayloadLen (4) | CRC32 (4) | bincode(MetaHeader)       │
//! ├──────────────────────────────────────────────────────────┤
//! │ Key-Record Table (record_capacity × 64 bytes)            │
//! │   shard 0 records | shard 1 records | ...                │
//! ├──────────────────────────────────────────────────────────┤
//! │ Value Arena (128-byte units, 4096-aligned)               │
//! │   shard 0 units | shard 1 units | ...                    │
//! │   small block = 1 unit, large block = 2 units            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! All unsafe access to the mapping is confined to `region`.

mod layout;
mod record;
mod region;

pub use layout::{Layout, MetaHeader, ARENA_ALIGN, FORMAT_VERSION, MAGIC, META_SIZE};
pub use record::{
    read_value, write_value, BlockId, BlockPlan, BlockSet, BlockSize, BufferSlot, Key,
    RecordHeader, RecordView, BLOCKS_PER_SET, KEY_SIZE, LARGE_BLOCK_SIZE, MAX_VALUE_LEN,
    RECORD_SIZE, SMALL_BLOCK_SIZE, UNIT_SIZE,
};
pub use region::{AccessFault, BackingStore};
