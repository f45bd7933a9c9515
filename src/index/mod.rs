//! Index Module
//!
//! Volatile lookup structures rebuilt from the record table on open.
//!
//! ## Responsibilities
//! - Hash 16-byte keys
//! - Map hashes to key-record indices (lock-free open addressing)
//! - Answer "never inserted" quickly (existence filter)
//!
//! Both structures are shared by all workers and mutated only with
//! atomic operations (compare-and-swap, fetch-or).

mod filter;
mod hash;
mod hash_index;

pub use filter::ExistenceFilter;
pub use hash::{hash_key, key_prefix};
pub use hash_index::HashIndex;
