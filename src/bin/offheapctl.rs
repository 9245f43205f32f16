//! Off-heap storage control tool
//!
//! Inspect the layout a configuration produces, or drive a store with a
//! parallel workload.
//!
//! # Examples
//!
//! ```bash
//! # Show segment layout for a 4 GB pool of 2 KB chunks
//! offheapctl plan --total-size 4g --chunk-size 2k
//!
//! # Run 100k put/get/remove cycles against a configured store
//! offheapctl --config offheap.toml stress --ops 100000 --value-size 3000
//! ```

use clap::{Args, Parser, Subcommand};
use photon_offheap::config::ProcessMemoryCeiling;
use photon_offheap::error::Error;
use photon_offheap::storage::offheap::{
    OffHeapStore, SharedStorageRegistry, StorageFactory, StoreStats,
};
use photon_offheap::OffHeapConfig;
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// PhotonDB off-heap storage tool
#[derive(Parser, Debug)]
#[command(name = "offheapctl")]
#[command(version = photon_offheap::VERSION)]
#[command(about = "Inspect and exercise PhotonDB off-heap storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "PHOTON_OFFHEAP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the segment layout derived from the configuration
    Plan(SizeArgs),

    /// Run a parallel put/get/remove workload and print store statistics
    Stress(StressArgs),

    /// Show version
    Version,
}

/// Overrides for configured sizes
#[derive(Args, Debug, Clone)]
struct SizeArgs {
    /// Total pool size, e.g. 256m
    #[arg(long)]
    total_size: Option<String>,

    /// Chunk size, e.g. 2k
    #[arg(long)]
    chunk_size: Option<String>,

    /// Segment count
    #[arg(long)]
    segments: Option<u32>,
}

#[derive(Args, Debug)]
struct StressArgs {
    #[command(flatten)]
    sizes: SizeArgs,

    /// Number of put/get/remove cycles
    #[arg(long, default_value = "10000")]
    ops: usize,

    /// Bytes per value
    #[arg(long, default_value = "3000")]
    value_size: usize,
}

#[derive(Serialize)]
struct StressReport {
    ops: usize,
    value_size: usize,
    capacity_exhausted: usize,
    mismatches: usize,
    elapsed_ms: u128,
    stats_before_destroy: StoreStats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli);

    match cli.command {
        Commands::Plan(sizes) => plan_command(cli.config, sizes),
        Commands::Stress(args) => stress_command(cli.config, args),
        Commands::Version => {
            println!("offheapctl {}", photon_offheap::VERSION);
            Ok(())
        }
    }
}

fn setup_logging(cli: &Cli) {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let filter = EnvFilter::from_default_env().add_directive(log_level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(!cli.no_color),
            )
            .with(filter)
            .init();
    }
}

fn load_config(path: Option<PathBuf>, sizes: &SizeArgs) -> anyhow::Result<OffHeapConfig> {
    let mut config = OffHeapConfig::load(path.as_deref())?;
    if let Some(total) = &sizes.total_size {
        config.total_size = total.clone();
    }
    if let Some(chunk) = &sizes.chunk_size {
        config.chunk_size = chunk.clone();
    }
    if sizes.segments.is_some() {
        config.segment_count = sizes.segments;
    }
    Ok(config)
}

fn factory(config: &OffHeapConfig) -> anyhow::Result<StorageFactory> {
    let ceiling = ProcessMemoryCeiling::from_config(config)?;
    Ok(StorageFactory::new(
        Box::new(ceiling),
        SharedStorageRegistry::new(),
    ))
}

/// Plan command - print the derived sizing
fn plan_command(path: Option<PathBuf>, sizes: SizeArgs) -> anyhow::Result<()> {
    let config = load_config(path, &sizes)?;
    let sizing = factory(&config)?.sizing(&config)?;
    println!("{}", serde_json::to_string_pretty(&sizing)?);
    Ok(())
}

/// Stress command - parallel workload against a fresh store
fn stress_command(path: Option<PathBuf>, args: StressArgs) -> anyhow::Result<()> {
    let mut config = load_config(path, &args.sizes)?;
    if !config.enabled {
        warn!("Off-heap storage disabled in configuration, enabling for stress run");
        config.enabled = true;
    }

    let factory = factory(&config)?;
    let store = factory.create(&config)?;
    info!(ops = args.ops, value_size = args.value_size, "Starting stress run");

    let exhausted = AtomicUsize::new(0);
    let mismatches = AtomicUsize::new(0);
    let start = Instant::now();

    (0..args.ops).into_par_iter().try_for_each(|i| -> anyhow::Result<()> {
        let hash = (i as i32).wrapping_mul(0x9E37_79B9u32 as i32);
        let value = vec![(i % 251) as u8; args.value_size];

        let entry = match store.put(hash, &value) {
            Ok(entry) => entry,
            Err(Error::CapacityExhausted { .. }) => {
                exhausted.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if store.get(hash, &entry)?.as_deref() != Some(value.as_slice()) {
            mismatches.fetch_add(1, Ordering::Relaxed);
        }
        store.remove(hash, &entry)?;
        Ok(())
    })?;

    let report = StressReport {
        ops: args.ops,
        value_size: args.value_size,
        capacity_exhausted: exhausted.load(Ordering::Relaxed),
        mismatches: mismatches.load(Ordering::Relaxed),
        elapsed_ms: start.elapsed().as_millis(),
        stats_before_destroy: store.stats(),
    };
    store.destroy();
    factory.registry().shutdown();

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.mismatches > 0 {
        anyhow::bail!("{} reads returned unexpected bytes", report.mismatches);
    }
    Ok(())
}
