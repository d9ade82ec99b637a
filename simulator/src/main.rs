//! TxnCoord Simulator
//!
//! Drives the transaction coordinator against simulated shards, either
//! through a scripted scenario or with randomly generated load.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use txncoord_coordinator::CoordinatorConfig;
use txncoord_participant::ClientConfig;

mod controller;
mod metrics;
mod scenario;
mod shards;

use controller::{SimulationController, SimulationSettings};
use scenario::Scenario;

/// TxnCoord Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Two-phase commit coordinator simulation environment")]
struct Args {
    /// Number of simulated shards to create
    #[arg(short = 'n', long, default_value = "3")]
    shards: usize,

    /// Built-in scenario to run (commit, abort, retry, late-vote, deadline)
    #[arg(short, long, conflicts_with = "scenario_file")]
    scenario: Option<String>,

    /// Scenario to run, loaded from a JSON file
    #[arg(long)]
    scenario_file: Option<PathBuf>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Generated transactions per second
    #[arg(long, default_value = "10.0")]
    rate: f64,

    /// Chance that a shard votes abort
    #[arg(long, default_value = "0.1")]
    abort_probability: f64,

    /// Chance that the network drops a command
    #[arg(long, default_value = "0.0")]
    failure_probability: f64,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if args.shards == 0 {
        anyhow::bail!("at least one shard is required");
    }

    let config = CoordinatorConfig::from_env();
    config.validate().map_err(anyhow::Error::msg)?;
    let client_config = ClientConfig::from_env();
    client_config.validate().map_err(anyhow::Error::msg)?;

    info!("Starting TxnCoord Simulator");
    info!("Shards: {}", args.shards);
    info!("Retry mode: {}", config.retry.mode);

    let metrics_enabled = config.metrics_enabled;
    let controller = SimulationController::new(
        SimulationSettings {
            shards: args.shards,
            rate: args.rate,
            abort_probability: args.abort_probability,
            failure_probability: args.failure_probability,
            seed: args.seed,
        },
        config,
        &client_config,
    );

    let scenario = match (&args.scenario, &args.scenario_file) {
        (Some(name), _) => Some(Scenario::load(name)?),
        (None, Some(path)) => Some(Scenario::from_file(path)?),
        (None, None) => None,
    };

    if let Some(scenario) = scenario {
        info!("Running scenario: {}", scenario.name);
        controller.run_scenario(scenario).await?;
    } else {
        info!("Running in continuous mode");
        info!("Press Ctrl+C to stop");

        let duration = if args.duration > 0 {
            Some(std::time::Duration::from_secs(args.duration))
        } else {
            None
        };

        controller.run(duration).await?;
    }

    let metrics = controller.metrics().await;
    let coordinator = controller.service().metrics();
    info!("Simulation complete");
    info!("Total transactions: {}", metrics.total_transactions);
    info!("Committed: {}", metrics.committed);
    info!("Aborted: {}", metrics.aborted);
    info!("Rejected: {}", metrics.rejected);
    info!("Commit rate: {:.2}", metrics.commit_rate());
    info!(
        "Latency avg/p50/p99: {}/{}/{}ms",
        metrics.average_latency_ms(),
        metrics.p50_latency_ms(),
        metrics.p99_latency_ms()
    );
    info!(
        "Commands sent: {}, retryable failures: {}, fatal failures: {}",
        coordinator.commands_sent, coordinator.retryable_failures, coordinator.fatal_failures
    );

    if metrics_enabled {
        println!("{}", controller.service().metrics_prometheus());
    }

    Ok(())
}
