//! Benchmark driver for the fam latency emulator.
//!
//! Usage:
//!   fam-bench                                   # run every scenario
//!   fam-bench --set fam.atomic_latency=1000     # override a config key
//!   fam-bench --bursts 2,4,16 --copy-size 65536
//!   fam-bench --show-config                     # print the effective config
//!
//! Logging follows `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_utils::CachePadded;
use fam_emu::emulator::with_thread_emulator;
use fam_emu::prelude::*;
use fam_emu::utils::bench::unit_name;
use fam_emu::utils::{measure_cycles, measure_scenarios, BenchConfig, CpuPinGuard, Scenario};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fam-bench", version, about = "Measure emulated fam operation costs")]
struct Args {
    /// Override a config key, e.g. `fam.atomic_latency=1000`. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,

    /// Compare-and-store burst sizes
    #[arg(long, value_delimiter = ',', default_values_t = [4usize, 8])]
    bursts: Vec<usize>,

    /// Bytes per emulated memcpy
    #[arg(long, default_value_t = 4096)]
    copy_size: usize,

    /// Samples per scenario
    #[arg(long, default_value_t = 30)]
    samples: usize,

    /// Unmeasured runs per scenario
    #[arg(long, default_value_t = 10)]
    warmup: usize,

    /// Seed of the sampling schedule (random when absent)
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = effective_config(&args.overrides)?;

    if args.show_config {
        print!("{}", toml::to_string_pretty(&config).context("serializing config")?);
        return Ok(());
    }

    let model = fam_emu::model::init(FamModel::from_config(&config))?;
    let _pin = CpuPinGuard::current();

    let seed = args.seed.unwrap_or_else(|| rand::rng().random());
    tracing::info!(seed, "sampling schedule seed");
    let mut rng = StdRng::seed_from_u64(seed);

    let bench_config = BenchConfig {
        samples: args.samples,
        warmup: args.warmup,
    };

    let widest = args.bursts.iter().copied().max().unwrap_or(0);
    let cells: Vec<CachePadded<FamAtomic64>> = (0..widest).map(|_| CachePadded::default()).collect();
    let src = vec![0xa5u8; args.copy_size];
    let mut dst = vec![0u8; args.copy_size];
    let persisted = CachePadded::new(FamAtomic64::new(0));
    let lock = CachePadded::new(FamSpinlock::new());

    let mut scenarios = Vec::new();
    for &burst in &args.bursts {
        let cells = &cells[..burst];
        scenarios.push(Scenario::new(
            format!("cas-burst-{burst}"),
            format!("{burst} compare-and-stores, no fence"),
            move || {
                fence();
                measure_cycles(|| cas_burst(cells)).0
            },
        ));
        scenarios.push(Scenario::new(
            format!("cas-burst-{burst}-fenced"),
            format!("{burst} compare-and-stores, then fence"),
            move || {
                fence();
                measure_cycles(|| {
                    cas_burst(cells);
                    fence();
                })
                .0
            },
        ));
    }
    scenarios.push(Scenario::new(
        format!("memcpy-{}", args.copy_size),
        format!("copy {} bytes from fam", args.copy_size),
        || measure_cycles(|| memcpy(&mut dst, &src)).0,
    ));
    scenarios.push(Scenario::new(
        "flush-persist",
        "update one word and persist its line",
        || {
            measure_cycles(|| {
                persisted.fetch_add(1);
                flush_persist(&*persisted);
            })
            .0
        },
    ));
    scenarios.push(Scenario::new(
        "spinlock",
        "uncontended lock and unlock",
        || {
            measure_cycles(|| {
                let _guard = lock.lock_guard();
            })
            .0
        },
    ));

    print_model(model);
    let results = measure_scenarios(scenarios, &bench_config, &mut rng);

    println!();
    println!(
        "{:<24} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "scenario",
        format!("median {}", unit_name()),
        "mean",
        "std dev",
        "min",
        "max"
    );
    for result in &results {
        let s = &result.summary;
        println!(
            "{:<24} {:>12} {:>12.1} {:>12.1} {:>12} {:>12}",
            result.name, s.median, s.mean, s.std_dev, s.min, s.max
        );
    }

    let stats = with_thread_emulator(|emu| emu.stats());
    println!();
    println!(
        "requests {}  stalls {} ({} {})  fences {} ({} {})",
        stats.requests,
        stats.stalls,
        stats.stall_cycles,
        unit_name(),
        stats.fences,
        stats.fence_cycles,
        unit_name()
    );

    fam_emu::emulator::shutdown_thread();
    Ok(())
}

/// Layered config sources, then `--set` overrides on top.
fn effective_config(overrides: &[String]) -> Result<FamConfig> {
    let mut config = FamConfig::load().context("loading fam config")?;
    for item in overrides {
        let (key, value) = item
            .split_once('=')
            .with_context(|| format!("expected KEY=VALUE, got `{item}`"))?;
        config
            .set(key.trim(), value.trim())
            .with_context(|| format!("applying `{item}`"))?;
    }
    Ok(config)
}

/// One pipelined compare-and-store per cell; each bumps the cell by one.
fn cas_burst(cells: &[CachePadded<FamAtomic64>]) {
    for cell in cells {
        let current = cell.raw().load(std::sync::atomic::Ordering::Relaxed);
        cell.compare_store(current, current.wrapping_add(1));
    }
}

fn print_model(model: &FamModel) {
    println!("fam model");
    println!("  enabled            {}", model.enabled);
    println!("  parallelism        {}", model.parallelism);
    println!("  atomic latency     {} ns", model.atomic_latency_ns);
    println!("  read latency       {} ns", model.read_latency_ns);
    println!(
        "  persist            {} ({} ns)",
        model.persist_enabled, model.persist_latency_ns
    );
    println!(
        "  invalidate         {} ({} ns)",
        model.invalidate_enabled, model.invalidate_latency_ns
    );
    println!("  cpu                {} MHz", model.cpu.mhz());
}
