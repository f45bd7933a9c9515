//! Tests for crash recovery
//!
//! These tests verify:
//! - Every committed key is found with its last value after reopen
//! - Nothing that was never committed appears after reopen
//! - Allocation resumes past every referenced block
//! - Geometry and header checks on reopen
//!
//! A "crash" is simulated by dropping the engine without `close` and, where
//! needed, writing a half-finished record directly into the store file.

use std::path::{Path, PathBuf};

use nvkv::pmem::{
    write_value, BackingStore, BlockSet, BufferSlot, Layout, RecordHeader, RecordView,
};
use nvkv::{Config, Durability, Engine, FaultHook, NvkvError, Status};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const SIZE: usize = 4 * 1024 * 1024;
const SHARDS: usize = 4;
const RECORDS: usize = 1024;

fn store_config(path: &Path) -> Config {
    Config::builder()
        .path(path)
        .total_size(SIZE)
        .shard_count(SHARDS)
        .record_capacity(RECORDS)
        .durability(Durability::Sync)
        .build()
}

fn setup_store() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.store");
    (temp_dir, path)
}

fn key(n: u64) -> [u8; 16] {
    let mut k = [0u8; 16];
    k[..8].copy_from_slice(&n.to_be_bytes());
    k[8..].copy_from_slice(b"recovery");
    k
}

fn value(n: u64, round: u64) -> Vec<u8> {
    let len = ((n * 37 + round * 101) % 1025) as usize;
    (0..len).map(|i| (n as usize + round as usize + i) as u8).collect()
}

/// Map the store file directly, the way a crashed writer left it
fn raw_store(path: &Path) -> (BackingStore, Layout) {
    let store = BackingStore::open(path, SIZE, Durability::Sync, FaultHook::new(|_| {})).unwrap();
    let layout = Layout::compute(SIZE, SHARDS, RECORDS).unwrap();
    (store, layout)
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_fresh_store_has_no_recovery_report() {
    let (_dir, path) = setup_store();
    let engine = Engine::open(store_config(&path)).unwrap();
    assert!(engine.recovery_report().is_none());
}

#[test]
fn test_reopen_restores_last_values() {
    let (_dir, path) = setup_store();

    {
        let engine = Engine::open(store_config(&path)).unwrap();
        let mut workers: Vec<_> = (0..SHARDS).map(|_| engine.register_worker()).collect();
        for round in 0..3 {
            for n in 0..200u64 {
                let worker = &mut workers[(n as usize + round as usize) % SHARDS];
                worker.set(&key(n), &value(n, round)).unwrap();
            }
        }
        // dropped without close
    }

    let engine = Engine::open(store_config(&path)).unwrap();
    let report = engine.recovery_report().unwrap();
    assert_eq!(report.records, 200);
    assert_eq!(report.per_shard_records.iter().sum::<u32>(), 200);

    let mut worker = engine.register_worker();
    for n in 0..200u64 {
        assert_eq!(worker.get(&key(n)).unwrap().unwrap(), value(n, 2), "key {}", n);
    }
    for n in 200..400u64 {
        assert!(worker.get(&key(n)).unwrap().is_none());
    }
}

#[test]
fn test_zero_length_value_survives_reopen() {
    let (_dir, path) = setup_store();
    {
        let engine = Engine::open(store_config(&path)).unwrap();
        let mut worker = engine.register_worker();
        worker.set(&key(1), b"").unwrap();
        worker.set(&key(2), b"after").unwrap();
    }

    let engine = Engine::open(store_config(&path)).unwrap();
    assert_eq!(engine.recovery_report().unwrap().records, 2);
    assert_eq!(engine.get(&key(1)).unwrap().as_deref(), Some(&b""[..]));
    assert_eq!(engine.get(&key(2)).unwrap().as_deref(), Some(&b"after"[..]));
}

#[test]
fn test_writes_after_recovery_do_not_clobber_old_values() {
    let (_dir, path) = setup_store();
    {
        let engine = Engine::open(store_config(&path)).unwrap();
        let mut worker = engine.register_worker();
        for n in 0..50u64 {
            worker.set(&key(n), &value(n, 0)).unwrap();
        }
    }

    let engine = Engine::open(store_config(&path)).unwrap();
    let report = engine.recovery_report().unwrap().clone();
    for (shard, &hw) in report.high_water.iter().enumerate() {
        let units = engine.layout().shard_units(shard);
        assert!(hw >= units.start && hw <= units.end);
    }

    let mut workers: Vec<_> = (0..SHARDS).map(|_| engine.register_worker()).collect();
    for n in 50..150u64 {
        workers[n as usize % SHARDS].set(&key(n), &value(n, 0)).unwrap();
    }
    for n in (0..50u64).step_by(2) {
        workers[n as usize % SHARDS].set(&key(n), &value(n, 1)).unwrap();
    }

    for n in 0..150u64 {
        let round = if n < 50 && n % 2 == 0 { 1 } else { 0 };
        assert_eq!(engine.get(&key(n)).unwrap().unwrap(), value(n, round), "key {}", n);
    }

    drop(workers);
    drop(engine);

    // And once more across a second restart.
    let engine = Engine::open(store_config(&path)).unwrap();
    assert_eq!(engine.recovery_report().unwrap().records, 150);
    for n in 0..150u64 {
        let round = if n < 50 && n % 2 == 0 { 1 } else { 0 };
        assert_eq!(engine.get(&key(n)).unwrap().unwrap(), value(n, round));
    }
}

#[test]
fn test_recovered_high_water_skips_referenced_blocks() {
    let (_dir, path) = setup_store();
    {
        let engine = Engine::open(store_config(&path)).unwrap();
        let mut worker = engine.register_worker();
        worker.set(&key(0), &[7u8; 300]).unwrap(); // large + small
    }

    let engine = Engine::open(store_config(&path)).unwrap();
    let start = engine.layout().shard_units(0).start;
    let report = engine.recovery_report().unwrap();
    // 3 units referenced, plus slack
    assert_eq!(report.high_water[0], start + 3 + 2);
    assert_eq!(report.high_water[1], engine.layout().shard_units(1).start);
}

#[test]
fn test_close_then_reopen() {
    let (_dir, path) = setup_store();
    {
        let engine = Engine::open(store_config(&path)).unwrap();
        engine.register_worker().set(&key(9), b"closed").unwrap();
        engine.close().unwrap();
    }
    let engine = Engine::open(store_config(&path)).unwrap();
    assert_eq!(engine.get(&key(9)).unwrap().as_deref(), Some(&b"closed"[..]));
}

#[test]
fn test_async_durability_survives_clean_close() {
    let (_dir, path) = setup_store();
    let config = |p: &Path| {
        Config::builder()
            .path(p)
            .total_size(SIZE)
            .shard_count(SHARDS)
            .record_capacity(RECORDS)
            .durability(Durability::Async)
            .build()
    };
    {
        let engine = Engine::open(config(&path)).unwrap();
        let mut worker = engine.register_worker();
        for n in 0..20u64 {
            worker.set(&key(n), &value(n, 0)).unwrap();
        }
        drop(worker);
        engine.close().unwrap();
    }
    let engine = Engine::open(config(&path)).unwrap();
    for n in 0..20u64 {
        assert_eq!(engine.get(&key(n)).unwrap().unwrap(), value(n, 0));
    }
}

// =============================================================================
// Crash Simulation Tests
// =============================================================================

#[test]
fn test_unpublished_insert_is_invisible() {
    let (_dir, path) = setup_store();
    {
        let engine = Engine::open(store_config(&path)).unwrap();
        let mut worker = engine.register_worker(); // shard 0
        for n in 0..3u64 {
            worker.set(&key(n), b"committed").unwrap();
        }
    }

    // Crash after the key and pointers were written but before the header.
    {
        let (store, layout) = raw_store(&path);
        let record = layout.shard_records(0).start + 3;
        let view = RecordView::new(&store, &layout, record);
        view.write_key(&key(3));
        view.write_block_set(BufferSlot::Primary, &BlockSet::new([0, 0, 0, 0]));
        view.persist_body().unwrap();
    }

    let engine = Engine::open(store_config(&path)).unwrap();
    assert_eq!(engine.recovery_report().unwrap().records, 3);
    assert!(engine.get(&key(3)).unwrap().is_none());

    // The slot is reused by the next insert on that shard.
    let mut worker = engine.register_worker();
    assert_eq!(worker.shard(), 0);
    worker.set(&key(4), b"next").unwrap();
    assert_eq!(engine.stats().shard_records[0], 4);
    assert_eq!(engine.get(&key(4)).unwrap().as_deref(), Some(&b"next"[..]));
}

#[test]
fn test_unpublished_update_keeps_old_value() {
    let (_dir, path) = setup_store();
    let start;
    {
        let engine = Engine::open(store_config(&path)).unwrap();
        let mut worker = engine.register_worker();
        worker.set(&key(0), &[b'x'; 80]).unwrap();
        start = engine.layout().shard_units(0).start;
    }

    // Crash after new blocks and the inactive set were persisted.
    {
        let (store, layout) = raw_store(&path);
        let record = layout.shard_records(0).start;
        let view = RecordView::new(&store, &layout, record);
        let header = view.header();
        assert!(header.live);

        let staged = BlockSet::new([start + 1, 0, 0, 0]);
        write_value(&store, &layout, &staged, &[b'y'; 200]).unwrap();
        view.write_block_set(header.active.other(), &staged);
        view.persist_body().unwrap();
    }

    let engine = Engine::open(store_config(&path)).unwrap();
    let value = engine.get(&key(0)).unwrap().unwrap();
    assert_eq!(value, vec![b'x'; 80]);
}

#[test]
fn test_record_pointing_outside_arena_reports_corruption() {
    let (_dir, path) = setup_store();
    {
        let engine = Engine::open(store_config(&path)).unwrap();
        let mut worker = engine.register_worker();
        worker.set(&key(0), b"hello").unwrap();
        worker.set(&key(1), b"intact").unwrap();
    }

    // A committed header whose pointer set names a block past the arena.
    {
        let (store, layout) = raw_store(&path);
        let record = layout.shard_records(0).start;
        let view = RecordView::new(&store, &layout, record);
        view.write_block_set(BufferSlot::Primary, &BlockSet::new([u32::MAX - 5, 0, 0, 0]));
        view.persist_body().unwrap();
        view.publish(RecordHeader::live(5, BufferSlot::Primary)).unwrap();
    }

    let engine = Engine::open(store_config(&path)).unwrap();
    let err = engine.get(&key(0)).err().unwrap();
    assert!(matches!(err, NvkvError::Corrupted(_)));

    let mut worker = engine.register_worker();
    let result = worker.get(&key(0));
    assert!(matches!(result, Err(NvkvError::Corrupted(_))));
    assert_eq!(Status::of_get(&result), Status::IoError);

    // Other records are unaffected.
    assert_eq!(worker.get(&key(1)).unwrap().as_deref(), Some(&b"intact"[..]));
}

#[test]
fn test_record_with_oversized_length_reports_corruption() {
    let (_dir, path) = setup_store();
    {
        let engine = Engine::open(store_config(&path)).unwrap();
        engine.register_worker().set(&key(0), b"hello").unwrap();
    }

    {
        let (store, layout) = raw_store(&path);
        let view = RecordView::new(&store, &layout, layout.shard_records(0).start);
        let header = view.header();
        view.publish(RecordHeader::live(4096, header.active)).unwrap();
    }

    let engine = Engine::open(store_config(&path)).unwrap();
    assert!(matches!(engine.get(&key(0)), Err(NvkvError::Corrupted(_))));
}

// =============================================================================
// Header and Geometry Tests
// =============================================================================

#[test]
fn test_reopen_with_different_shard_count_fails() {
    let (_dir, path) = setup_store();
    Engine::open(store_config(&path)).unwrap();

    let config = Config::builder()
        .path(&path)
        .total_size(SIZE)
        .shard_count(SHARDS * 2)
        .record_capacity(RECORDS)
        .build();
    let err = Engine::open(config).err().unwrap();
    assert!(matches!(err, NvkvError::LayoutMismatch(_)));
}

#[test]
fn test_reopen_with_different_size_fails() {
    let (_dir, path) = setup_store();
    Engine::open(store_config(&path)).unwrap();

    let config = Config::builder()
        .path(&path)
        .total_size(SIZE * 2)
        .shard_count(SHARDS)
        .record_capacity(RECORDS)
        .build();
    let err = Engine::open(config).err().unwrap();
    assert!(matches!(err, NvkvError::LayoutMismatch(_)));
}

#[test]
fn test_corrupted_meta_header_is_rejected() {
    let (_dir, path) = setup_store();
    Engine::open(store_config(&path)).unwrap();

    {
        let (store, _) = raw_store(&path);
        let mut byte = [0u8; 1];
        store.read(12, &mut byte);
        byte[0] ^= 0xFF;
        store.write(12, &byte);
        store.persist(0, 4096).unwrap();
    }

    let err = Engine::open(store_config(&path)).err().unwrap();
    assert!(matches!(err, NvkvError::Corrupted(_)));
}

#[test]
fn test_anonymous_region_starts_empty() {
    let config = Config::builder()
        .anonymous()
        .total_size(SIZE)
        .shard_count(SHARDS)
        .record_capacity(RECORDS)
        .durability(Durability::None)
        .build();
    let engine = Engine::open(config).unwrap();
    assert!(engine.recovery_report().is_none());
    assert!(engine.get(&key(0)).unwrap().is_none());
}
