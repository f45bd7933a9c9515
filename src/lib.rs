//! # nvkv
//!
//! A persistent key-value engine over a memory-mapped region with:
//! - Fixed 16-byte keys and values up to 1 KiB
//! - Update-in-place with an atomic 8-byte commit word (no log)
//! - Per-shard block allocation for parallel writers
//! - Lock-free lookups through a hash index and existence filter
//! - Parallel crash recovery by scanning the record table
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Worker × N  (one per thread)                    │
//! │           set / get          private ReadCache               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Engine                                 │
//! │     ExistenceFilter ─▶ HashIndex ─▶ seqlocked record read     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ ShardState  │          │  Recovery   │
//!   │ (allocator) │          │ (fork-join) │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────────────────────────────────┐
//!   │ BackingStore: meta │ records │ arena     │
//!   └─────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod pmem;
pub mod alloc;
pub mod index;
pub mod cache;
pub mod recovery;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NvkvError, Result, Status};
pub use config::{Config, Durability, FaultHook};
pub use engine::{Engine, EngineStats, Worker};
pub use pmem::{KEY_SIZE, MAX_VALUE_LEN};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of nvkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
