//! Configuration for nvkv
//!
//! Centralized configuration with sensible defaults.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{NvkvError, Result};
use crate::pmem::AccessFault;

/// Main configuration for an nvkv engine
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Backing Store Configuration
    // -------------------------------------------------------------------------
    /// Backing file. `None` maps an anonymous region that cannot be recovered.
    pub path: Option<PathBuf>,

    /// Total size of the mapped region (in bytes)
    pub total_size: usize,

    /// How `persist` makes writes durable
    pub durability: Durability,

    /// Invoked on an out-of-range access to the mapped region
    pub fault_hook: FaultHook,

    // -------------------------------------------------------------------------
    // Geometry Configuration
    // -------------------------------------------------------------------------
    /// Number of write shards (record table and arena partitions)
    pub shard_count: usize,

    /// Maximum number of distinct keys
    pub record_capacity: usize,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Existence filter bits per record slot
    pub filter_bits_per_record: usize,

    /// Number of locks serialising first inserts of colliding hashes
    pub insert_stripes: usize,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Read cache entries per worker (0 disables the cache)
    pub cache_capacity: usize,
}

/// Durability strategy for `persist`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// msync the written range before returning (safest, slowest)
    Sync,

    /// Schedule write-back of the range without waiting
    Async,

    /// Ordering fences only (anonymous regions, DAX mappings)
    None,
}

/// Callback for access faults on the mapped region.
///
/// The backing store panics after the hook returns, so a hook that wants
/// the default behaviour must terminate the process itself.
#[derive(Clone)]
pub struct FaultHook(Arc<dyn Fn(&AccessFault) + Send + Sync>);

impl FaultHook {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&AccessFault) + Send + Sync + 'static,
    {
        Self(Arc::new(hook))
    }

    /// Log the fault and terminate the process
    pub fn terminate() -> Self {
        Self::new(|fault| {
            tracing::error!(%fault, "fatal access fault on mapped region, terminating");
            std::process::exit(1);
        })
    }

    pub(crate) fn invoke(&self, fault: &AccessFault) {
        (self.0)(fault)
    }
}

impl Default for FaultHook {
    fn default() -> Self {
        Self::terminate()
    }
}

impl fmt::Debug for FaultHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FaultHook")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: None,
            total_size: 64 * 1024 * 1024, // 64 MB
            durability: Durability::Sync,
            fault_hook: FaultHook::default(),
            shard_count: 16,
            record_capacity: 65_536,
            filter_bits_per_record: 8,
            insert_stripes: 1024,
            cache_capacity: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings that cannot produce a usable engine
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(NvkvError::Config("shard_count must be at least 1".into()));
        }
        if self.record_capacity < self.shard_count {
            return Err(NvkvError::Config(format!(
                "record_capacity {} is smaller than shard_count {}",
                self.record_capacity, self.shard_count
            )));
        }
        if self.record_capacity >= u32::MAX as usize {
            return Err(NvkvError::Config(format!(
                "record_capacity {} does not fit a 32-bit record index",
                self.record_capacity
            )));
        }
        if self.filter_bits_per_record == 0 {
            return Err(NvkvError::Config(
                "filter_bits_per_record must be at least 1".into(),
            ));
        }
        if self.insert_stripes == 0 {
            return Err(NvkvError::Config("insert_stripes must be at least 1".into()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the backing file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = Some(path.into());
        self
    }

    /// Use an anonymous mapping instead of a file
    pub fn anonymous(mut self) -> Self {
        self.config.path = None;
        self
    }

    /// Set the total region size (in bytes)
    pub fn total_size(mut self, size: usize) -> Self {
        self.config.total_size = size;
        self
    }

    /// Set the durability strategy
    pub fn durability(mut self, durability: Durability) -> Self {
        self.config.durability = durability;
        self
    }

    /// Set the access fault hook
    pub fn fault_hook(mut self, hook: FaultHook) -> Self {
        self.config.fault_hook = hook;
        self
    }

    /// Set the number of write shards
    pub fn shard_count(mut self, count: usize) -> Self {
        self.config.shard_count = count;
        self
    }

    /// Set the maximum number of keys
    pub fn record_capacity(mut self, count: usize) -> Self {
        self.config.record_capacity = count;
        self
    }

    /// Set the existence filter density
    pub fn filter_bits_per_record(mut self, bits: usize) -> Self {
        self.config.filter_bits_per_record = bits;
        self
    }

    /// Set the number of insert stripe locks
    pub fn insert_stripes(mut self, count: usize) -> Self {
        self.config.insert_stripes = count;
        self
    }

    /// Set the per-worker read cache capacity (in entries)
    pub fn cache_capacity(mut self, entries: usize) -> Self {
        self.config.cache_capacity = entries;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
