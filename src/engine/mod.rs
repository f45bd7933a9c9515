//! Engine Module
//!
//! The storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Map (or create) the backing region and format or recover it
//! - Hand out `Worker` sessions, each bound to one write shard
//! - Route `set` to update-in-place or insert
//! - Serve `get` through the filter, index and seqlocked record read
//!
//! ## Architecture
//! ```text
//!   Worker ─┬─▶ ReadCache (private)
//!           │
//!           ▼
//!   ┌──────────────── EngineInner (shared) ────────────────┐
//!   │ ExistenceFilter   HashIndex   VersionTable           │
//!   │ Mutex<ShardState> × shards    Mutex<()> × stripes    │
//!   │ BackingStore: meta │ record table │ value arena      │
//!   └──────────────────────────────────────────────────────┘
//! ```

mod version;
mod worker;

pub use worker::Worker;

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::utils::Backoff;
use parking_lot::Mutex;

use crate::alloc::ShardState;
use crate::cache::ReadCache;
use crate::config::{Config, Durability};
use crate::error::{NvkvError, Result};
use crate::index::{hash_key, key_prefix, ExistenceFilter, HashIndex};
use crate::pmem::{
    read_value, write_value, BackingStore, BufferSlot, Key, Layout, RecordHeader, RecordView,
    MAX_VALUE_LEN,
};
use crate::recovery::{RecoveryManager, RecoveryReport};

use version::VersionTable;

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Writes**: a `set` holds its worker's shard mutex for its whole
///   duration, so a shard's live records always form a dense prefix of its
///   record range. Workers on different shards write in parallel.
///   - Lock order: shard → insert stripe → record version
///   - First inserts of one key from two shards are serialised by the
///     insert stripe the key hashes to. `HashIndex::insert` itself is
///     lock-free, but the insert path of `set` blocks on that stripe mutex.
///
/// - **Reads**: lock-free. The filter and index are atomics; the value is
///   copied out under the record's sequence lock and retried if a writer
///   committed meanwhile. A record that stays unreadable while no writer
///   holds it fails with `Corrupted`.
///
/// Cloning an `Engine` is cheap and shares the same store.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: Config,
    layout: Layout,
    store: BackingStore,
    index: HashIndex,
    filter: ExistenceFilter,
    versions: VersionTable,
    shards: Box<[Mutex<ShardState>]>,
    insert_stripes: Box<[Mutex<()>]>,
    next_shard: AtomicUsize,
    recovery: Option<RecoveryReport>,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    sets: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    not_found: AtomicU64,
    out_of_memory: AtomicU64,
}

/// Snapshot of engine counters and occupancy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub gets: u64,
    pub sets: u64,
    pub inserts: u64,
    pub updates: u64,
    pub not_found: u64,
    pub out_of_memory: u64,
    /// Keys currently indexed
    pub keys: usize,
    /// Key records in use, per shard
    pub shard_records: Vec<u32>,
    /// Allocator high-water mark, per shard
    pub shard_high_water: Vec<u32>,
    /// Existence filter bits set
    pub filter_bits_set: usize,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate the config and compute the region layout
    /// 2. Map the backing file (or an anonymous region)
    /// 3. Format a never-used region, or verify the persisted geometry
    /// 4. Recover index, filter and shard state from the record table
    pub fn open(config: Config) -> Result<Self> {
        // Step 1: Geometry
        config.validate()?;
        let layout = Layout::compute(
            config.total_size,
            config.shard_count,
            config.record_capacity,
        )?;

        // Step 2: Map the region
        let store = match &config.path {
            Some(path) => BackingStore::open(
                path,
                config.total_size,
                config.durability,
                config.fault_hook.clone(),
            )?,
            None => BackingStore::anonymous(
                config.total_size,
                config.durability,
                config.fault_hook.clone(),
            )?,
        };

        let capacity = layout.record_capacity();
        let index = HashIndex::new(capacity);
        let filter = ExistenceFilter::new(capacity.saturating_mul(config.filter_bits_per_record));

        // Step 3 and 4: Format or recover
        let (shards, recovery) = match Layout::load_header(&store)? {
            Some(header) => {
                layout.verify(&header)?;
                let (shards, report) =
                    RecoveryManager::new(&store, &layout, &index, &filter).run()?;
                (shards, Some(report))
            }
            None => {
                layout.format(&store)?;
                tracing::info!(
                    size = layout.total_size,
                    shards = layout.shard_count,
                    records = capacity,
                    "formatted new region"
                );
                let shards = (0..layout.shard_count)
                    .map(|id| ShardState::new(&layout, id))
                    .collect();
                (shards, None)
            }
        };

        tracing::info!(
            path = ?config.path,
            recovered = recovery.as_ref().map_or(0, |r| r.records),
            "engine open"
        );

        let insert_stripes = (0..config.insert_stripes).map(|_| Mutex::new(())).collect();

        Ok(Self {
            inner: Arc::new(EngineInner {
                versions: VersionTable::new(capacity),
                shards: shards.into_iter().map(Mutex::new).collect(),
                insert_stripes,
                next_shard: AtomicUsize::new(0),
                recovery,
                counters: Counters::default(),
                config,
                layout,
                store,
                index,
                filter,
            }),
        })
    }

    /// Open a file-backed engine with default settings
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().path(path).build())
    }

    /// Register a worker session
    ///
    /// Workers are bound to shards round-robin.
    pub fn register_worker(&self) -> Worker {
        let shard =
            self.inner.next_shard.fetch_add(1, Ordering::Relaxed) % self.inner.layout.shard_count;
        tracing::debug!(shard, "registered worker");
        Worker::new(
            self.clone(),
            shard,
            ReadCache::new(self.inner.config.cache_capacity),
        )
    }

    /// Look up a key without a read cache
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let key = to_key(key)?;
        self.inner.get(&key, None)
    }

    /// Flush the whole region when writes were not made durable eagerly
    pub fn close(self) -> Result<()> {
        let inner = &self.inner;
        if inner.config.durability != Durability::Sync {
            inner.store.persist(0, inner.store.len())?;
        }
        inner.store.drain();
        tracing::info!("engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        let c = &inner.counters;
        let (shard_records, shard_high_water) = inner
            .shards
            .iter()
            .map(|s| {
                let s = s.lock();
                (s.record_count(), s.high_water())
            })
            .unzip();

        EngineStats {
            gets: c.gets.load(Ordering::Relaxed),
            sets: c.sets.load(Ordering::Relaxed),
            inserts: c.inserts.load(Ordering::Relaxed),
            updates: c.updates.load(Ordering::Relaxed),
            not_found: c.not_found.load(Ordering::Relaxed),
            out_of_memory: c.out_of_memory.load(Ordering::Relaxed),
            keys: inner.index.len(),
            shard_records,
            shard_high_water,
            filter_bits_set: inner.filter.count_ones(),
        }
    }

    /// Report of the recovery run, if the region held data on open
    pub fn recovery_report(&self) -> Option<&RecoveryReport> {
        self.inner.recovery.as_ref()
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

pub(crate) fn to_key(key: &[u8]) -> Result<Key> {
    key.try_into()
        .map_err(|_| NvkvError::InvalidKeyLength(key.len()))
}

fn check_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_LEN {
        return Err(NvkvError::ValueTooLarge {
            len: value.len(),
            max: MAX_VALUE_LEN,
        });
    }
    Ok(())
}

impl EngineInner {
    fn view(&self, record: u32) -> RecordView<'_> {
        RecordView::new(&self.store, &self.layout, record)
    }

    /// Record index holding `key`, if any
    fn locate(&self, key: &Key, hash: u64) -> Option<u32> {
        if !self.filter.test(hash) {
            return None;
        }
        self.index
            .search(hash, key_prefix(key), |record| self.view(record).key_eq(key))
    }

    fn get(&self, key: &Key, cache: Option<&mut ReadCache>) -> Result<Option<Bytes>> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);

        let Some(record) = self.locate(key, hash_key(key)) else {
            self.counters.not_found.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let Some(cache) = cache else {
            return Ok(Some(self.read_record(record)?.1));
        };

        if let Some(value) = cache.get(record, self.versions.stable(record)) {
            return Ok(Some(value));
        }
        let (version, value) = self.read_record(record)?;
        cache.put(record, version, value.clone());
        Ok(Some(value))
    }

    /// Copy out the committed value of `record` with the version it was
    /// read at
    ///
    /// A header that names blocks outside the arena (or an oversized
    /// length) while the version held still is corruption on media, not a
    /// torn read, and fails with `Corrupted` instead of retrying.
    fn read_record(&self, record: u32) -> Result<(u64, Bytes)> {
        let view = self.view(record);
        let backoff = Backoff::new();
        loop {
            let version = self.versions.stable(record);
            let header = view.header();
            let set = view.block_set(header.active);
            let value = read_value(&self.store, &self.layout, &set, header.len as usize);

            match value {
                Some(value) if self.versions.validate(record, version) => {
                    return Ok((version, Bytes::from(value)));
                }
                None if self.versions.validate(record, version) => {
                    tracing::error!(
                        record,
                        len = header.len,
                        blocks = ?set,
                        "record names blocks outside the arena"
                    );
                    return Err(NvkvError::Corrupted(format!(
                        "record {} names blocks outside the arena",
                        record
                    )));
                }
                _ => backoff.snooze(),
            }
        }
    }

    fn set(&self, shard_id: usize, key: &Key, value: &[u8]) -> Result<()> {
        check_value(value)?;
        self.counters.sets.fetch_add(1, Ordering::Relaxed);

        let hash = hash_key(key);
        let mut shard = self.shards[shard_id].lock();

        if let Some(record) = self.locate(key, hash) {
            return self.update(&mut shard, record, value);
        }

        let stripe = (hash % self.insert_stripes.len() as u64) as usize;
        let _stripe = self.insert_stripes[stripe].lock();
        // Another shard may have inserted the key while we waited.
        if let Some(record) = self.locate(key, hash) {
            return self.update(&mut shard, record, value);
        }
        self.insert(&mut shard, key, hash, value)
    }

    /// Replace the value of an existing record
    ///
    /// Steps:
    /// 1. Enter the record's sequence lock
    /// 2. Allocate and persist new blocks
    /// 3. Persist the new pointers into the inactive block set
    /// 4. Publish a header word that flips the active set (commit point)
    /// 5. Recycle the blocks of the previous value
    fn update(&self, shard: &mut ShardState, record: u32, value: &[u8]) -> Result<()> {
        let guard = self.versions.lock(record);
        let view = self.view(record);
        let current = view.header();
        let retired = view.block_set(current.active);

        let Some(blocks) = shard.allocator().allocate_value(value.len()) else {
            return Err(self.out_of_memory(shard.id()));
        };

        let staging = current.active.other();
        let staged = write_value(&self.store, &self.layout, &blocks, value).and_then(|_| {
            view.write_block_set(staging, &blocks);
            view.persist_body()
        });
        if let Err(e) = staged {
            shard.allocator().recycle_value(&blocks, value.len());
            return Err(e);
        }

        if let Err(e) = view.publish(RecordHeader::live(value.len() as u32, staging)) {
            // The header word is already visible; only its flush failed.
            guard.commit();
            return Err(e);
        }

        shard.allocator().recycle_value(&retired, current.len as usize);
        guard.commit();
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Create the record for a key that is not yet indexed
    fn insert(&self, shard: &mut ShardState, key: &Key, hash: u64, value: &[u8]) -> Result<()> {
        let Some(blocks) = shard.allocator().allocate_value(value.len()) else {
            return Err(self.out_of_memory(shard.id()));
        };
        let Some(record) = shard.allocate_record() else {
            shard.allocator().recycle_value(&blocks, value.len());
            return Err(self.out_of_memory(shard.id()));
        };

        let view = self.view(record);
        let staged = write_value(&self.store, &self.layout, &blocks, value).and_then(|_| {
            view.write_key(key);
            view.write_block_set(BufferSlot::Primary, &blocks);
            view.persist_body()
        });
        if let Err(e) = staged {
            shard.release_record(record);
            shard.allocator().recycle_value(&blocks, value.len());
            return Err(e);
        }

        // The header word is stored before its flush can fail, so from here
        // the record must be indexed or retracted.
        let published = view.publish(RecordHeader::live(value.len() as u32, BufferSlot::Primary));
        if let Err(e) = self.index.insert(hash, key_prefix(key), record) {
            let retracted = view.retract();
            shard.release_record(record);
            // A header that may still read live on media keeps its blocks.
            retracted?;
            shard.allocator().recycle_value(&blocks, value.len());
            return Err(e);
        }
        self.filter.set(hash);
        published?;

        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn out_of_memory(&self, shard: usize) -> NvkvError {
        self.counters.out_of_memory.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(shard, "shard out of memory");
        NvkvError::OutOfMemory { shard }
    }
}
