//! nvkv Workload Driver
//!
//! Runs a mixed Get/Set workload from many threads against one store and
//! reports throughput.

use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use clap::Parser;
use nvkv::{Config, Durability, Engine, Status, KEY_SIZE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{fmt, EnvFilter};

/// nvkv workload driver
#[derive(Parser, Debug)]
#[command(name = "nvkv-bench")]
#[command(about = "Multi-threaded Get/Set workload for nvkv")]
#[command(version)]
struct Args {
    /// Store file (created if missing)
    #[arg(short, long, default_value = "./nvkv.store")]
    path: PathBuf,

    /// Region size in MB
    #[arg(short, long, default_value = "256")]
    size_mb: usize,

    /// Worker threads
    #[arg(short, long, default_value = "8")]
    threads: usize,

    /// Operations per thread
    #[arg(short, long, default_value = "100000")]
    ops: usize,

    /// Value size in bytes
    #[arg(short, long, default_value = "80")]
    value_size: usize,

    /// Fraction of operations that are reads (0.0 - 1.0)
    #[arg(short, long, default_value = "0.5")]
    read_ratio: f64,

    /// Distinct keys in the workload
    #[arg(short, long, default_value = "100000")]
    keys: u64,

    /// Skip msync (data survives a process crash but not power loss)
    #[arg(long)]
    no_sync: bool,
}

fn key_for(n: u64) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    key[..8].copy_from_slice(&n.to_le_bytes());
    key[8..].copy_from_slice(&(!n).to_le_bytes());
    key
}

#[derive(Default)]
struct Tally {
    ok: u64,
    not_found: u64,
    failed: u64,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nvkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("nvkv bench v{}", nvkv::VERSION);
    tracing::info!("Store: {} ({} MB)", args.path.display(), args.size_mb);

    let records = (args.keys as usize).next_power_of_two().max(1024);
    let config = Config::builder()
        .path(&args.path)
        .total_size(args.size_mb * 1024 * 1024)
        .record_capacity(records)
        .durability(if args.no_sync {
            Durability::Async
        } else {
            Durability::Sync
        })
        .build();

    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    let value = vec![b'v'; args.value_size];
    let started = Instant::now();

    let handles: Vec<_> = (0..args.threads)
        .map(|t| {
            let engine = engine.clone();
            let value = value.clone();
            let (ops, keys, read_ratio) = (args.ops, args.keys.max(1), args.read_ratio);
            thread::spawn(move || {
                let mut worker = engine.register_worker();
                let mut rng = StdRng::seed_from_u64(0x9E37_79B9_7F4A_7C15 ^ t as u64);
                let mut tally = Tally::default();
                let read_ratio = read_ratio.clamp(0.0, 1.0);

                for _ in 0..ops {
                    let key = key_for(rng.gen_range(0..keys));
                    let status = if rng.gen_bool(read_ratio) {
                        Status::of_get(&worker.get(&key))
                    } else {
                        Status::of_set(&worker.set(&key, &value))
                    };
                    match status {
                        Status::Ok => tally.ok += 1,
                        Status::NotFound => tally.not_found += 1,
                        Status::IoError | Status::OutOfMemory => tally.failed += 1,
                    }
                }
                tally
            })
        })
        .collect();

    let mut total = Tally::default();
    for handle in handles {
        match handle.join() {
            Ok(t) => {
                total.ok += t.ok;
                total.not_found += t.not_found;
                total.failed += t.failed;
            }
            Err(_) => tracing::error!("worker thread panicked"),
        }
    }

    let elapsed = started.elapsed();
    let ops = (args.threads * args.ops) as f64;
    tracing::info!(
        ok = total.ok,
        not_found = total.not_found,
        failed = total.failed,
        elapsed_ms = elapsed.as_millis() as u64,
        "workload complete"
    );
    tracing::info!("Throughput: {:.0} ops/s", ops / elapsed.as_secs_f64());

    let stats = engine.stats();
    tracing::info!(keys = stats.keys, inserts = stats.inserts, updates = stats.updates, "engine stats");

    if let Err(e) = engine.close() {
        tracing::error!("Failed to close engine: {}", e);
        std::process::exit(1);
    }
}
