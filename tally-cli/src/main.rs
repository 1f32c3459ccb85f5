//! CLI for the tally usage counters.
//!
//! Provides commands for listing windows, simulating traffic against a
//! registry, and benchmarking the increment path.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tally::{DayReset, DefaultWindow, Registry, RegistryConfig, Window, WindowExt};
use tracing_subscriber::EnvFilter;

/// tally: multi-resolution sliding-window usage counters CLI.
#[derive(Parser)]
#[command(name = "tally", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List the built-in windows.
    Windows,

    /// Drive a registry with synthetic traffic and print the ranking.
    Simulate {
        /// Registry configuration file (JSON). Defaults are used if omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of distinct keys.
        #[arg(long, default_value = "20")]
        keys: usize,

        /// Increments per simulated minute, per thread.
        #[arg(long, default_value = "1000")]
        events: u64,

        /// Number of writer threads.
        #[arg(long, default_value = "4")]
        threads: u64,

        /// Number of simulated minutes.
        #[arg(long, default_value = "10")]
        minutes: u64,

        /// Window to rank by (see `tally windows`).
        #[arg(long, default_value = "last-5-minutes")]
        window: DefaultWindow,

        /// Number of keys to print.
        #[arg(long, default_value = "10")]
        top: usize,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Run an increment-path microbenchmark.
    Bench {
        /// Total number of increments.
        #[arg(long, default_value = "10000000")]
        increments: u64,

        /// Number of distinct keys.
        #[arg(long, default_value = "100")]
        keys: usize,

        /// Number of writer threads.
        #[arg(long, default_value = "4")]
        threads: u64,
    },
}

/// Output format for rankings.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with a ranking array.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Windows => {
            cmd_windows();
            Ok(())
        }
        Commands::Simulate {
            config,
            keys,
            events,
            threads,
            minutes,
            window,
            top,
            format,
        } => {
            let traffic = Traffic {
                keys,
                events,
                threads,
                minutes,
            };
            cmd_simulate(config.as_ref(), &traffic, window, top, &format)
        }
        Commands::Bench {
            increments,
            keys,
            threads,
        } => cmd_bench(increments, keys, threads),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `tally windows`.
fn cmd_windows() {
    for window in DefaultWindow::ALL {
        println!("{window}");
    }
}

/// Shape of the synthetic workload for `tally simulate`.
struct Traffic {
    keys: usize,
    events: u64,
    threads: u64,
    minutes: u64,
}

/// Implements `tally simulate`.
///
/// Time is simulated: each minute of traffic is followed by a manual sweep
/// instead of waiting for the scheduler.
fn cmd_simulate(
    config_path: Option<&PathBuf>,
    traffic: &Traffic,
    window: DefaultWindow,
    top: usize,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if traffic.keys == 0 {
        return Err("--keys must be at least 1".into());
    }

    let config = match config_path {
        Some(path) => RegistryConfig::from_json_file(path)?,
        None => RegistryConfig::default(),
    };
    let rolls_days = matches!(config.scheduler.day, DayReset::Every(_));
    let registry = Arc::new(Registry::new(config)?);
    let keys: Arc<[String]> = (0..traffic.keys).map(|i| format!("key_{i}")).collect();

    tracing::info!(
        keys = traffic.keys,
        threads = traffic.threads,
        minutes = traffic.minutes,
        "simulating traffic"
    );

    for minute in 1..=traffic.minutes {
        let workers: Vec<_> = (0..traffic.threads)
            .map(|t| {
                let registry = Arc::clone(&registry);
                let keys = Arc::clone(&keys);
                let events = traffic.events;
                let mut rng = StdRng::seed_from_u64((minute << 16) | t);
                thread::spawn(move || -> tally::Result<()> {
                    for _ in 0..events {
                        registry.increment(keys[skewed(&mut rng, keys.len())].clone(), 1)?;
                    }
                    Ok(())
                })
            })
            .collect();

        for worker in workers {
            worker.join().map_err(|_| "writer thread panicked")??;
        }

        registry.roll_seconds();
        registry.roll_minutes();
        if minute % 60 == 0 {
            registry.roll_hours();
        }
        if rolls_days && minute % 1440 == 0 {
            registry.roll_days();
        }
    }

    let ranking = registry.highest(&window, top);
    let total = registry.total(&window);

    match format {
        OutputFormat::Csv => {
            println!(
                "# window={}, keys={}, total={total}",
                window.name(),
                registry.len()
            );
            println!("rank,key,amount");
            for (rank, counter) in ranking.iter().enumerate() {
                println!("{},{},{}", rank + 1, counter.key(), window.amount(counter));
            }
        }
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = ranking
                .iter()
                .map(|counter| {
                    serde_json::json!({
                        "key": counter.key(),
                        "amount": window.amount(counter),
                        "total": counter.total_usages(),
                    })
                })
                .collect();

            let output = serde_json::json!({
                "window": window.name(),
                "keys": registry.len(),
                "total": total,
                "ranking": rows,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `tally bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(increments: u64, key_count: usize, threads: u64) -> Result<(), Box<dyn std::error::Error>> {
    if key_count == 0 || threads == 0 {
        return Err("--keys and --threads must be at least 1".into());
    }

    println!("tally increment-path benchmark");
    println!("  Increments: {increments}");
    println!("  Keys: {key_count}");
    println!("  Threads: {threads}");
    println!();

    let registry = Arc::new(Registry::new(RegistryConfig::default())?);
    let keys: Arc<[String]> = (0..key_count).map(|i| format!("key_{i}")).collect();
    let per_thread = increments / threads;

    let start = Instant::now();

    let workers: Vec<_> = (0..threads)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let keys = Arc::clone(&keys);
            let mut rng = StdRng::seed_from_u64(t + 1);
            thread::spawn(move || -> tally::Result<()> {
                for _ in 0..per_thread {
                    registry.increment(keys[rng.gen_range(0..keys.len())].clone(), 1)?;
                }
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        worker.join().map_err(|_| "writer thread panicked")??;
    }

    let elapsed = start.elapsed();
    let total_increments = per_thread * threads;
    let ns_per_increment = elapsed.as_nanos() as f64 / total_increments.max(1) as f64;
    let increments_per_sec = total_increments as f64 / elapsed.as_secs_f64();

    println!("Results:");
    println!("  Total increments: {total_increments}");
    println!("  Recorded: {}", registry.total(&DefaultWindow::Total));
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_increment:.1} ns/increment");
    println!("  Throughput: {increments_per_sec:.0} increments/sec");

    Ok(())
}

/// Picks low indices more often, so rankings have a clear head.
fn skewed(rng: &mut impl Rng, n: usize) -> usize {
    let a = rng.gen_range(0..n);
    let b = rng.gen_range(0..n);
    a.min(b)
}
