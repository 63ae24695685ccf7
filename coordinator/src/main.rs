use anyhow::Context;
use clap::Parser;
use packetizer::observability::{init_production_logging, init_simple_logging, LogFormat};
use packetizer::{
    spawn_progress_reporter, DatasetDescription, DispatchStats, Packetizer, SharedPacketizer,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinSet;

mod config;
mod errors;
mod sim;

use config::Config;
use sim::{ShardSizes, SimulatedCounter, WorkerOutcome, WorkerProfile};

/// Packetizer Coordinator - drives the packet scheduler with a simulated worker pool
#[derive(Parser, Debug)]
#[command(name = "packetizer-coordinator")]
#[command(about = "Distribute a sharded dataset over a simulated worker pool")]
#[command(version)]
struct Cli {
    /// Configuration file path [default: ~/.packetizer/coordinator.toml]
    #[arg(short, long)]
    config: Option<String>,

    /// Dataset description (TOML); a synthetic dataset is generated when absent
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Override the number of host-local workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the simulation seed
    #[arg(long)]
    seed: Option<u64>,

    /// Generate default config and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => PathBuf::from(shellexpand::tilde(path).as_ref()),
        None => Config::default_path()?,
    };
    let config_path = config_path.as_path();

    if cli.generate_config {
        let config = Config::default();
        config.save(config_path)?;
        println!("Generated default configuration at: {}", config_path.display());
        println!("\nEdit the configuration file and then start the coordinator with:");
        println!("  packetizer-coordinator --config {}", config_path.display());
        return Ok(());
    }

    let mut config = if config_path.exists() {
        Config::load(config_path)?
    } else {
        // Auto-generate default config on first run
        let config = Config::default();
        config.save(config_path)?;

        println!(
            "First run detected - created default configuration at: {}",
            config_path.display()
        );
        println!("Edit {} to customize the simulation\n", config_path.display());

        config
    };

    if let Some(workers) = cli.workers {
        config.simulation.workers = workers;
    }
    if let Some(seed) = cli.seed {
        config.simulation.seed = seed;
    }
    config.validate()?;

    setup_logging(&config, cli.log_level.as_deref())?;

    tracing::info!("Starting Packetizer Coordinator");
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Version");
    tracing::info!(
        strategy = ?config.packetizer.strategy,
        max_workers_per_host = config.packetizer.max_workers_per_host,
        packet_fraction_divisor = config.packetizer.packet_fraction_divisor,
        fixed_packet_size = ?config.packetizer.fixed_packet_size,
        use_worker_weights = config.packetizer.use_worker_weights,
        "Packetizer configuration"
    );

    let mut rng = StdRng::seed_from_u64(config.simulation.seed);
    let (dataset, sizes) = match &cli.dataset {
        Some(path) => {
            let dataset = DatasetDescription::load(path)
                .with_context(|| format!("loading dataset {}", path.display()))?;
            let sizes = ShardSizes::for_dataset(&dataset, &config.simulation, &mut rng);
            (dataset, sizes)
        }
        None => sim::synthetic_dataset(&config.simulation, &mut rng),
    };

    let specs = sim::worker_specs(&config.simulation, &dataset);
    tracing::info!(
        dataset = %dataset.name,
        shards = dataset.shards.len(),
        workers = specs.len(),
        "Dataset ready"
    );

    let stats = Arc::new(DispatchStats::new());
    let mut packetizer = Packetizer::new(
        config.packetizer.clone(),
        dataset.into_elements(),
        specs.clone(),
    )?
    .with_stats_sink(stats.clone());

    if packetizer.needs_validation() {
        let counter = SimulatedCounter::new(sizes.clone(), &config.simulation);
        let summary = packetizer.validate(&counter).await?;
        println!(
            "Validation: {} shards counted, {} invalid, {} failed",
            summary.counted, summary.invalidated, summary.failed
        );
    }
    if packetizer.is_partially_invalid() {
        tracing::warn!(
            invalid = packetizer.registry().invalid_count(),
            "Dataset partially invalid, continuing with valid shards"
        );
    }

    let shared = SharedPacketizer::new(packetizer);
    let reporter = spawn_progress_reporter(
        shared.clone(),
        Duration::from_millis(config.packetizer.progress_interval_ms),
    );

    let mut workers = JoinSet::new();
    for (i, spec) in specs.into_iter().enumerate() {
        let profile = WorkerProfile::draw(&config.simulation, &mut rng);
        workers.spawn(sim::run_worker(
            spec.id,
            shared.clone(),
            sizes.clone(),
            profile,
            config.simulation.seed.wrapping_add(i as u64 + 1),
        ));
    }

    println!("\nPacketizer Coordinator is running!");
    println!("Press Ctrl+C to stop\n");

    let mut outcomes = Vec::new();
    let mut stopping = false;
    loop {
        tokio::select! {
            // Handle graceful shutdown
            _ = signal::ctrl_c(), if !stopping => {
                tracing::info!("Received shutdown signal (Ctrl+C)");
                println!("\nStopping, waiting for outstanding packets...");
                shared.stop()?;
                stopping = true;
            }

            joined = workers.join_next() => {
                match joined {
                    Some(Ok(outcome)) => outcomes.push(outcome),
                    Some(Err(e)) => tracing::error!(error = %e, "Worker task failed"),
                    None => break,
                }
            }
        }
    }

    // every worker is gone; unblock the reporter even if work was stranded
    shared.stop()?;
    if let Err(e) = reporter.await {
        tracing::warn!(error = %e, "Progress reporter task failed");
    }

    let snapshot = shared.report_progress()?;
    if let Some(total) = snapshot.estimated_total {
        if snapshot.processed < total {
            tracing::warn!(
                processed = snapshot.processed,
                total,
                "Run ended with unprocessed entries"
            );
        }
    }
    stats.print_summary();
    print_summary(&outcomes, &snapshot, &stats);
    if config.logging.log_format == LogFormat::Json {
        println!("{}", stats.to_json());
    }

    tracing::info!("Coordinator stopped");
    Ok(())
}

/// Setup logging based on configuration
fn setup_logging(config: &Config, log_level_override: Option<&str>) -> anyhow::Result<()> {
    let level = log_level_override.unwrap_or(&config.logging.level);

    if config.logging.log_to_file {
        let log_dir = shellexpand::tilde(&config.logging.log_dir).into_owned();
        init_production_logging(level, Some(PathBuf::from(log_dir)), config.logging.log_format)
    } else {
        init_simple_logging(level, config.logging.log_format)
    }
}

fn print_summary(
    outcomes: &[WorkerOutcome],
    snapshot: &packetizer::ProgressSnapshot,
    stats: &DispatchStats,
) {
    println!("\nRun summary");
    println!("===========");
    println!(
        "  Entries processed:   {} / {}",
        snapshot.processed,
        snapshot
            .estimated_total
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".to_string())
    );
    println!("  Packets issued:      {}", snapshot.packets_issued);
    if snapshot.returned_entries > 0 {
        println!("  Left unassigned:     {}", snapshot.returned_entries);
    }
    println!("  Avg packet size:     {:.1}", stats.avg_packet_size());
    println!("  Elapsed:             {:.2}s", snapshot.elapsed_secs);

    println!("\n  Workers:");
    for outcome in outcomes {
        println!(
            "    {:<12} packets {:>5}  entries {:>9}  retries {:>4}{}",
            outcome.id,
            outcome.packets,
            outcome.processed,
            outcome.retries,
            if outcome.died { "  (died)" } else { "" }
        );
    }
    println!();
}
