//! Read Cache Module
//!
//! Bounded per-worker LRU of recently read values.
//!
//! ## Validity
//! Each entry remembers the record version observed when the value was
//! copied out of the arena. A hit counts only if the record's live version
//! still equals it; versions change on every committed update, so an entry
//! can never serve a value older than the last completed `set`.
//!
//! The cache is owned by one `Worker` and needs no synchronization.

mod lru;

pub use lru::ReadCache;
