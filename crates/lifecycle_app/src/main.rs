//! # lifecycle_app: Scenario runner
//!
//! Drives the lifecycle observers through a scripted world scenario and
//! reports how many activations each observer started and tore down.
//!
//! ## Run sequence
//!
//! 1. Parse arguments and initialise structured logging on stderr.
//! 2. Run the scenario on a current-thread runtime inside a `LocalSet`.
//! 3. Print the report to stdout and fail if any activation leaked.

mod config;
mod scenario;

use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tokio::task::LocalSet;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{OutputFormat, ScenarioConfig};

#[derive(Parser, Debug)]
#[command(name = "lifecycle_app", about = "Run a scripted scenario through the lifecycle observers")]
struct Args {
    /// Number of players that join
    #[arg(long, default_value_t = 3)]
    players: usize,

    /// Character respawns per player
    #[arg(long, default_value_t = 2)]
    respawns: usize,

    /// Simulated activation latency in milliseconds
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// Log filter directive (overrides RUST_LOG)
    #[arg(long)]
    log_filter: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl From<&Args> for ScenarioConfig {
    fn from(args: &Args) -> Self {
        let output = if args.json {
            OutputFormat::Json
        } else {
            OutputFormat::Plain
        };
        ScenarioConfig::new(args.players)
            .with_respawns(args.respawns)
            .with_latency(Duration::from_millis(args.latency_ms))
            .with_output(output)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match &args.log_filter {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| "lifecycle_app=info".into()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = ScenarioConfig::from(&args);
    info!(?config, "scenario starting");

    let report = LocalSet::new().run_until(scenario::run(&config)).await?;

    match config.output {
        OutputFormat::Plain => println!("{report}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    let leaked = report.leaked();
    if leaked > 0 {
        bail!("{leaked} activations were never torn down");
    }
    info!("scenario finished");
    Ok(())
}
