use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use buffer_pool::{BufferPool, SharedBufferPool};
use clap::Parser;
use common::api::{BlockId, BpmError, BufferPoolManager};
use common::config::{PoolConfig, StoreOptions, DEFAULT_POOL_SIZE};
use common::disk_manager::DiskManager;
use log::{error, info};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Block file to benchmark against; removed afterwards unless --keep-file is set
    #[arg(long, default_value = "benchmark.db")]
    db_file: PathBuf,

    /// Number of frames in the pool
    #[arg(short, long, default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: usize,

    /// Number of blocks to write and read back
    #[arg(short, long, default_value_t = 1000)]
    blocks: usize,

    /// Do not advise the kernel that access is random
    #[arg(long)]
    no_access_hint: bool,

    /// Keep the block file after the run
    #[arg(long)]
    keep_file: bool,
}

struct BenchmarkResult {
    write: Duration,
    cold_read: Duration,
    hot_read: Duration,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    println!("Setting up buffer pool implementations for benchmarking.");
    println!(
        "Pool size: {}, blocks: {}, access hint: {}",
        args.pool_size, args.blocks, !args.no_access_hint
    );

    let options = StoreOptions::new(&args.db_file).access_hint(!args.no_access_hint);
    let config = PoolConfig::new(args.pool_size);

    let single = run_benchmark(&options, config, args.blocks, |dm| BufferPool::with_config(config, dm));
    let shared = run_benchmark(&options, config, args.blocks, |dm| {
        BufferPool::with_config(config, dm).map(SharedBufferPool::from_pool)
    });

    if !args.keep_file {
        let _ = std::fs::remove_file(&args.db_file);
    }

    let (single, shared) = match (single, shared) {
        (Ok(single), Ok(shared)) => (single, shared),
        (Err(e), _) | (_, Err(e)) => {
            error!("benchmark failed: {}", e);
            eprintln!("Benchmark failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("\n--- Benchmark Results ---");
    println!("| Implementation   | Write Time      | Cold Read Time  | Hot Read Time   |");
    println!("|------------------|-----------------|-----------------|-----------------|");
    println!("| BufferPool       | {:<15?} | {:<15?} | {:<15?} |", single.write, single.cold_read, single.hot_read);
    println!("| SharedBufferPool | {:<15?} | {:<15?} | {:<15?} |", shared.write, shared.cold_read, shared.hot_read);
    ExitCode::SUCCESS
}

fn open_store(options: &StoreOptions) -> Result<DiskManager, BpmError> {
    Ok(DiskManager::open_with(options)?)
}

fn reset_file(path: &Path) {
    // Each implementation starts from an empty file.
    let _ = std::fs::remove_file(path);
}

fn run_benchmark<B: BufferPoolManager>(
    options: &StoreOptions,
    config: PoolConfig,
    num_blocks: usize,
    build: impl Fn(DiskManager) -> Result<B, BpmError>,
) -> Result<BenchmarkResult, BpmError> {
    reset_file(&options.path);

    let mut pool = build(open_store(options)?)?;
    let start = Instant::now();
    let mut block_ids = Vec::with_capacity(num_blocks);
    for i in 0..num_blocks {
        let (block_id, ()) = pool.create_block(|data| data.fill(i as u8))?;
        block_ids.push(block_id);
    }
    pool.flush_all_blocks()?;
    let write = start.elapsed();
    drop(pool);

    // A fresh pool over the same file, so every first fetch is a miss.
    let mut pool = build(open_store(options)?)?;
    let start = Instant::now();
    for (i, &block_id) in block_ids.iter().enumerate() {
        let tag = pool.read_block(block_id, |data| data[0])?;
        if tag != i as u8 {
            error!("block {} read back tag {}, expected {}", block_id, tag, i as u8);
        }
    }
    let cold_read = start.elapsed();

    let hot_set = &block_ids[..block_ids.len().min(config.pool_size)];
    for &block_id in hot_set {
        pool.read_block(block_id, |data| data[0])?;
    }
    let start = Instant::now();
    for _ in 0..10 {
        for &block_id in hot_set {
            pool.read_block(block_id, |data| data[0])?;
        }
    }
    let hot_read = start.elapsed();

    info!(
        "finished {} blocks: write {:?}, cold read {:?}, hot read {:?}",
        num_blocks, write, cold_read, hot_read
    );
    Ok(BenchmarkResult {
        write,
        cold_read,
        hot_read,
    })
}
