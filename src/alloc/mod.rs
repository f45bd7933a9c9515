//! Allocation Module
//!
//! Space management for the record table and the value arena.
//!
//! ## Responsibilities
//! - Hand out small (128 B) and large (256 B) value blocks per shard
//! - Reuse overwritten blocks through per-size LIFO free lists
//! - Hand out key-record slots from an append-only per-shard sequence
//!
//! ## Sharding
//! Both the record table and the arena are split into `shard_count`
//! equal, disjoint ranges. A worker is bound to one shard at registration
//! and only that shard's state is mutated by its writes, so the shard
//! mutex is uncontended while workers ≤ shards.
//!
//! Free lists are volatile. Blocks sitting on a free list at crash time
//! are below the recovered high-water mark and are not reused.

mod allocator;
mod shard;

pub use allocator::BlockAllocator;
pub use shard::ShardState;
