//! nvkv CLI
//!
//! Single-key get/set against a store file.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use nvkv::{Config, Engine, KEY_SIZE};
use tracing_subscriber::{fmt, EnvFilter};

/// nvkv CLI
#[derive(Parser, Debug)]
#[command(name = "nvkv-cli")]
#[command(about = "CLI for the nvkv key-value engine")]
#[command(version)]
struct Args {
    /// Store file
    #[arg(short, long, default_value = "./nvkv.store")]
    path: PathBuf,

    /// Region size in MB (must match the size the store was created with)
    #[arg(short, long, default_value = "64")]
    size_mb: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key (up to 16 bytes, zero padded)
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key (up to 16 bytes, zero padded)
        key: String,

        /// The value to set
        value: String,
    },

    /// Print engine statistics
    Stats,
}

/// Zero-pad a textual key to the fixed key size
fn pad_key(key: &str) -> Result<[u8; KEY_SIZE], String> {
    let bytes = key.as_bytes();
    if bytes.len() > KEY_SIZE {
        return Err(format!(
            "key '{}' is {} bytes, at most {} allowed",
            key,
            bytes.len(),
            KEY_SIZE
        ));
    }
    let mut out = [0u8; KEY_SIZE];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

fn run(args: Args) -> Result<(), String> {
    let config = Config::builder()
        .path(&args.path)
        .total_size(args.size_mb * 1024 * 1024)
        .build();
    let engine = Engine::open(config).map_err(|e| e.to_string())?;
    let mut worker = engine.register_worker();

    match args.command {
        Commands::Get { key } => {
            let key = pad_key(&key)?;
            match worker.get(&key).map_err(|e| e.to_string())? {
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                None => println!("(nil)"),
            }
        }
        Commands::Set { key, value } => {
            let key = pad_key(&key)?;
            worker
                .set(&key, value.as_bytes())
                .map_err(|e| e.to_string())?;
            println!("OK");
        }
        Commands::Stats => {
            let stats = engine.stats();
            println!("keys:            {}", stats.keys);
            println!("filter bits set: {}", stats.filter_bits_set);
            for (shard, (records, hw)) in stats
                .shard_records
                .iter()
                .zip(&stats.shard_high_water)
                .enumerate()
            {
                println!("shard {:>3}: {:>8} records, high water {}", shard, records, hw);
            }
            if let Some(report) = engine.recovery_report() {
                println!("recovered {} records in {:?}", report.records, report.elapsed);
            }
        }
    }

    drop(worker);
    engine.close().map_err(|e| e.to_string())
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,nvkv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}
