//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/set operations and argument validation
//! - Update-in-place visibility across size classes
//! - Out-of-memory behaviour (no partial effects)
//! - Read cache staleness across workers
//! - Concurrent inserts and updates from many workers

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Barrier};
use std::thread;

use nvkv::pmem::{BackingStore, Layout, RecordView};
use nvkv::{Config, Durability, Engine, FaultHook, NvkvError, Status, MAX_VALUE_LEN};
use proptest::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_engine() -> Engine {
    let config = Config::builder()
        .anonymous()
        .total_size(8 * 1024 * 1024)
        .shard_count(4)
        .record_capacity(4096)
        .durability(Durability::None)
        .build();
    Engine::open(config).unwrap()
}

/// One shard with room for exactly `units` arena units and `records` keys
fn setup_tiny_engine(units: usize, records: usize) -> Engine {
    // meta page + one page of records, then the arena
    let config = Config::builder()
        .anonymous()
        .total_size(8192 + units * 128)
        .shard_count(1)
        .record_capacity(records)
        .durability(Durability::None)
        .build();
    Engine::open(config).unwrap()
}

fn key(s: &str) -> [u8; 16] {
    let mut k = [0u8; 16];
    k[..s.len()].copy_from_slice(s.as_bytes());
    k
}

fn numbered_key(n: u64) -> [u8; 16] {
    let mut k = [0u8; 16];
    k[..8].copy_from_slice(&n.to_be_bytes());
    k[8..].copy_from_slice(b"numbered");
    k
}

/// A value whose bytes identify its owner and length
fn tagged_value(tag: u8, len: usize) -> Vec<u8> {
    vec![tag; len]
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_set_then_get() {
    let engine = setup_engine();
    let mut worker = engine.register_worker();

    worker.set(&key("alpha"), b"one").unwrap();
    assert_eq!(worker.get(&key("alpha")).unwrap().as_deref(), Some(&b"one"[..]));
}

#[test]
fn test_get_missing_key_is_not_found() {
    let engine = setup_engine();
    let mut worker = engine.register_worker();

    let result = worker.get(&key("missing"));
    assert!(matches!(result, Ok(None)));
    assert_eq!(Status::of_get(&result), Status::NotFound);
}

#[test]
fn test_update_across_size_classes() {
    let engine = setup_engine();
    let mut worker = engine.register_worker();
    let k = *b"AAAAAAAAAAAAAAAA";

    worker.set(&k, &[b'x'; 80]).unwrap();
    let v = worker.get(&k).unwrap().unwrap();
    assert_eq!(v.len(), 80);
    assert!(v.iter().all(|&b| b == b'x'));

    worker.set(&k, &[b'y'; 200]).unwrap();
    let v = worker.get(&k).unwrap().unwrap();
    assert_eq!(v.len(), 200);
    assert!(v.iter().all(|&b| b == b'y'));

    worker.set(&k, &[b'z'; 1000]).unwrap();
    assert_eq!(worker.get(&k).unwrap().unwrap().len(), 1000);

    worker.set(&k, b"short").unwrap();
    assert_eq!(worker.get(&k).unwrap().as_deref(), Some(&b"short"[..]));
}

#[test]
fn test_value_boundaries() {
    let engine = setup_engine();
    let mut worker = engine.register_worker();

    for len in [0, 1, 127, 128, 129, 255, 256, 257, 384, 385, 512, 768, 1023, MAX_VALUE_LEN] {
        let k = numbered_key(len as u64);
        let value: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        worker.set(&k, &value).unwrap();
        assert_eq!(worker.get(&k).unwrap().unwrap(), value, "len {}", len);
    }
}

#[test]
fn test_zero_length_value_is_found() {
    let engine = setup_engine();
    let mut worker = engine.register_worker();

    worker.set(&key("empty"), b"").unwrap();
    let value = worker.get(&key("empty")).unwrap();
    assert_eq!(value.as_deref(), Some(&b""[..]));
}

#[test]
fn test_invalid_key_length() {
    let engine = setup_engine();
    let mut worker = engine.register_worker();

    let err = worker.set(b"short", b"v").unwrap_err();
    assert!(matches!(err, NvkvError::InvalidKeyLength(5)));

    let err = worker.get(&[0u8; 17]).unwrap_err();
    assert!(matches!(err, NvkvError::InvalidKeyLength(17)));
}

#[test]
fn test_value_too_large() {
    let engine = setup_engine();
    let mut worker = engine.register_worker();

    let err = worker
        .set(&key("big"), &vec![0u8; MAX_VALUE_LEN + 1])
        .unwrap_err();
    assert!(matches!(
        err,
        NvkvError::ValueTooLarge { len, max } if len == MAX_VALUE_LEN + 1 && max == MAX_VALUE_LEN
    ));
    assert!(worker.get(&key("big")).unwrap().is_none());
}

#[test]
fn test_engine_get_sees_worker_writes() {
    let engine = setup_engine();
    let mut worker = engine.register_worker();

    worker.set(&key("shared"), b"value").unwrap();
    assert_eq!(engine.get(&key("shared")).unwrap().as_deref(), Some(&b"value"[..]));
}

fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(0usize),
        Just(MAX_VALUE_LEN),
        0..=MAX_VALUE_LEN,
    ]
    .prop_flat_map(|len| prop::collection::vec(any::<u8>(), len))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_set_get_round_trip(
        writes in prop::collection::vec((0u64..24, value_strategy()), 1..40),
    ) {
        let engine = setup_engine();
        let mut writer = engine.register_worker();
        let mut reader = engine.register_worker();
        let mut expected = HashMap::new();

        for (n, value) in writes {
            writer.set(&numbered_key(n), &value).unwrap();
            prop_assert_eq!(&reader.get(&numbered_key(n)).unwrap().unwrap()[..], &value[..]);
            expected.insert(n, value);
        }
        for (n, value) in &expected {
            prop_assert_eq!(&engine.get(&numbered_key(*n)).unwrap().unwrap()[..], &value[..]);
            prop_assert_eq!(&reader.get(&numbered_key(*n)).unwrap().unwrap()[..], &value[..]);
        }
        prop_assert_eq!(engine.stats().keys, expected.len());
    }
}

// =============================================================================
// Out-of-Memory Tests
// =============================================================================

#[test]
fn test_out_of_blocks_leaves_store_unchanged() {
    // Exactly one maximum-size value fits.
    let engine = setup_tiny_engine(8, 16);
    let mut worker = engine.register_worker();

    worker.set(&key("first"), &[1u8; MAX_VALUE_LEN]).unwrap();

    let result = worker.set(&key("second"), &[2u8; MAX_VALUE_LEN]);
    assert_eq!(Status::of_set(&result), Status::OutOfMemory);
    assert!(worker.get(&key("second")).unwrap().is_none());

    // An update needs fresh blocks before the old ones are released.
    let result = worker.set(&key("first"), &[3u8; MAX_VALUE_LEN]);
    assert!(matches!(result, Err(NvkvError::OutOfMemory { shard: 0 })));
    assert_eq!(
        worker.get(&key("first")).unwrap().unwrap(),
        vec![1u8; MAX_VALUE_LEN]
    );
    assert_eq!(engine.stats().out_of_memory, 2);
}

#[test]
fn test_updates_reuse_recycled_blocks() {
    // Two large blocks: room for one 256-byte value plus its replacement.
    let engine = setup_tiny_engine(4, 16);
    let mut worker = engine.register_worker();

    for round in 0..100u8 {
        worker.set(&key("cycle"), &[round; 256]).unwrap();
    }
    assert_eq!(worker.get(&key("cycle")).unwrap().unwrap(), vec![99u8; 256]);
}

#[test]
fn test_out_of_key_records() {
    let engine = setup_tiny_engine(64, 2);
    let mut worker = engine.register_worker();

    worker.set(&key("a"), b"1").unwrap();
    worker.set(&key("b"), b"2").unwrap();
    let result = worker.set(&key("c"), b"3");
    assert_eq!(Status::of_set(&result), Status::OutOfMemory);

    // Existing keys can still be updated.
    worker.set(&key("a"), b"11").unwrap();
    assert_eq!(worker.get(&key("a")).unwrap().as_deref(), Some(&b"11"[..]));
    assert!(worker.get(&key("c")).unwrap().is_none());
}

// =============================================================================
// Read Cache Tests
// =============================================================================

#[test]
fn test_cached_value_is_refreshed_after_update_by_other_worker() {
    let engine = setup_engine();
    let mut reader = engine.register_worker();
    let mut writer = engine.register_worker();

    writer.set(&key("hot"), b"v1").unwrap();
    assert_eq!(reader.get(&key("hot")).unwrap().as_deref(), Some(&b"v1"[..]));
    assert_eq!(reader.get(&key("hot")).unwrap().as_deref(), Some(&b"v1"[..]));
    assert_eq!(reader.cache().hits(), 1);

    writer.set(&key("hot"), b"v2").unwrap();
    assert_eq!(reader.get(&key("hot")).unwrap().as_deref(), Some(&b"v2"[..]));
}

#[test]
fn test_own_update_is_visible_through_cache() {
    let engine = setup_engine();
    let mut worker = engine.register_worker();

    worker.set(&key("k"), b"old").unwrap();
    worker.get(&key("k")).unwrap();
    worker.set(&key("k"), b"new").unwrap();
    assert_eq!(worker.get(&key("k")).unwrap().as_deref(), Some(&b"new"[..]));
}

#[test]
fn test_cache_disabled() {
    let config = Config::builder()
        .anonymous()
        .total_size(4 * 1024 * 1024)
        .record_capacity(1024)
        .durability(Durability::None)
        .cache_capacity(0)
        .build();
    let engine = Engine::open(config).unwrap();
    let mut worker = engine.register_worker();

    worker.set(&key("k"), b"v").unwrap();
    worker.get(&key("k")).unwrap();
    worker.get(&key("k")).unwrap();
    assert!(worker.cache().is_empty());
    assert_eq!(worker.cache().hits(), 0);
}

// =============================================================================
// Worker Registration Tests
// =============================================================================

#[test]
fn test_workers_bound_round_robin() {
    let engine = setup_engine();
    let shards: Vec<usize> = (0..8).map(|_| engine.register_worker().shard()).collect();
    assert_eq!(shards, vec![0, 1, 2, 3, 0, 1, 2, 3]);
}

#[test]
fn test_stats_track_operations() {
    let engine = setup_engine();
    let mut worker = engine.register_worker();

    worker.set(&key("a"), b"1").unwrap();
    worker.set(&key("a"), b"2").unwrap();
    worker.set(&key("b"), b"3").unwrap();
    worker.get(&key("a")).unwrap();
    worker.get(&key("zzz")).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.sets, 3);
    assert_eq!(stats.inserts, 2);
    assert_eq!(stats.updates, 1);
    assert_eq!(stats.gets, 2);
    assert_eq!(stats.not_found, 1);
    assert_eq!(stats.keys, 2);
    assert_eq!(stats.shard_records.iter().sum::<u32>(), 2);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_inserts_never_share_blocks() {
    const THREADS: usize = 16;
    const PER_THREAD: u64 = 10_000;
    const SIZE: usize = 64 * 1024 * 1024;
    const RECORDS: usize = 256 * 1024;

    fn final_value(n: u64) -> Vec<u8> {
        if n % 7 == 0 {
            tagged_value((n % 251) as u8, 300 + (n % 700) as usize)
        } else {
            tagged_value((n % 251) as u8, 1 + (n % 100) as usize)
        }
    }

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shared.store");
    let config = Config::builder()
        .path(&path)
        .total_size(SIZE)
        .shard_count(THREADS)
        .record_capacity(RECORDS)
        .durability(Durability::None)
        .build();
    let engine = Engine::open(config).unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = engine.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut worker = engine.register_worker();
                barrier.wait();
                let keys = t as u64 * PER_THREAD..(t as u64 + 1) * PER_THREAD;
                for n in keys.clone() {
                    let value = tagged_value((n % 251) as u8, 1 + (n % 100) as usize);
                    worker.set(&numbered_key(n), &value).unwrap();
                }
                // Updates recycle blocks while other shards keep allocating.
                for n in keys.filter(|n| n % 7 == 0) {
                    worker.set(&numbered_key(n), &final_value(n)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for n in 0..THREADS as u64 * PER_THREAD {
        assert_eq!(engine.get(&numbered_key(n)).unwrap().unwrap(), final_value(n));
    }
    assert_eq!(engine.stats().keys, THREADS * PER_THREAD as usize);
    drop(engine);

    // Walk every live record and claim the arena units its active set names.
    let store = BackingStore::open(&path, SIZE, Durability::None, FaultHook::new(|_| {})).unwrap();
    let layout = Layout::compute(SIZE, THREADS, RECORDS).unwrap();
    let mut claimed = HashSet::new();
    let mut live = 0u64;
    for shard in 0..THREADS {
        for record in layout.shard_records(shard) {
            let view = RecordView::new(&store, &layout, record);
            let header = view.header();
            if !header.live {
                break;
            }
            live += 1;
            let set = view.block_set(header.active);
            for (id, size) in set.blocks(header.len as usize) {
                for unit in id..id + size.units() {
                    assert!(claimed.insert(unit), "unit {} named by two live records", unit);
                }
            }
        }
    }
    assert_eq!(live, THREADS as u64 * PER_THREAD);
}

#[test]
fn test_concurrent_first_insert_of_same_key() {
    const THREADS: usize = 8;

    let engine = setup_engine();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = engine.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut worker = engine.register_worker();
                barrier.wait();
                worker.set(&key("contended"), &[t as u8; 64]).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let stats = engine.stats();
    assert_eq!(stats.keys, 1);
    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.updates, THREADS as u64 - 1);

    let value = engine.get(&key("contended")).unwrap().unwrap();
    assert_eq!(value.len(), 64);
    assert!(value.iter().all(|&b| b == value[0]));
}

#[test]
fn test_readers_never_see_torn_values() {
    const WRITERS: usize = 4;
    const READERS: usize = 4;
    const KEYS: u64 = 32;
    const ROUNDS: usize = 2_000;

    let engine = setup_engine();
    {
        let mut worker = engine.register_worker();
        for n in 0..KEYS {
            worker.set(&numbered_key(n), &tagged_value(1, 5)).unwrap();
        }
    }

    let mut handles = Vec::new();
    for w in 0..WRITERS {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            let mut worker = engine.register_worker();
            for round in 0..ROUNDS {
                let n = (round as u64 * 7 + w as u64) % KEYS;
                // Length is derived from the tag so readers can check both.
                let tag = ((round + w) % 200 + 1) as u8;
                worker
                    .set(&numbered_key(n), &tagged_value(tag, tag as usize * 5))
                    .unwrap();
            }
        }));
    }
    for _ in 0..READERS {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            let mut worker = engine.register_worker();
            for round in 0..ROUNDS * 2 {
                let n = round as u64 % KEYS;
                let value = worker.get(&numbered_key(n)).unwrap().unwrap();
                let tag = value[0];
                assert_eq!(value.len(), tag as usize * 5);
                assert!(value.iter().all(|&b| b == tag));
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_distinct_records_per_key() {
    let engine = setup_engine();
    let mut workers: Vec<_> = (0..4).map(|_| engine.register_worker()).collect();

    let mut written = HashSet::new();
    for n in 0..400u64 {
        let worker = &mut workers[(n % 4) as usize];
        worker.set(&numbered_key(n), &n.to_le_bytes()).unwrap();
        written.insert(n);
    }

    let stats = engine.stats();
    assert_eq!(stats.keys, written.len());
    assert_eq!(stats.shard_records, vec![100, 100, 100, 100]);
    for n in written {
        assert_eq!(
            engine.get(&numbered_key(n)).unwrap().as_deref(),
            Some(&n.to_le_bytes()[..])
        );
    }
}
