//! threadscope CLI - exercise scope hand-off between threads.

mod scenario;
mod simulate;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use simulate::SimulationConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "threadscope")]
#[command(about = "Thread-affinitized lifecycle scope demo", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log scope hand-offs at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch units of work and continue them on worker threads
    Simulate {
        /// Number of units of work
        #[arg(long, default_value = "8")]
        units: usize,
        /// Number of worker threads
        #[arg(long, default_value = "4")]
        workers: usize,
        /// Recording listeners per unit
        #[arg(long, default_value = "2")]
        listeners: usize,
        /// Make every n-th unit carry a listener that rejects LEAVE
        #[arg(long)]
        fail_every: Option<usize>,
    },
    /// Walk one context through promote, detach, replace and restore
    Scenario,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout is reserved for results
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Simulate { units, workers, listeners, fail_every } => {
            let config = SimulationConfig {
                units,
                workers,
                listeners_per_unit: listeners,
                fail_every,
            };
            info!(?config, "starting simulation");
            let report = simulate::run(&config)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.print();
            }
            if report.failure_count > 0 {
                bail!("{} listener failure(s) reported", report.failure_count);
            }
        }
        Commands::Scenario => {
            let steps = scenario::run()?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&steps)?);
            } else {
                println!("Scenario ({} steps)", steps.len());
                for (i, step) in steps.iter().enumerate() {
                    println!(
                        "  {}. {:<28} events={} last={} current={}",
                        i + 1,
                        step.step,
                        step.events,
                        step.last.map(|e| e.to_string()).unwrap_or_else(|| "-".to_string()),
                        step.plate_is_current,
                    );
                }
            }
        }
    }

    Ok(())
}
