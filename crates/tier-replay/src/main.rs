//! Replay a telemetry scenario through the tier engine
//!
//! ```bash
//! tier-replay crates/tier-replay/scenarios/commute.toml
//! tier-replay scenario.toml --client phone-2 --hysteresis-secs 5
//! ```
//!
//! Decisions are written to stdout as JSON lines; logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use tier_replay::{replay, to_json_lines, Scenario};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario TOML file
    scenario: PathBuf,

    /// Replace the scenario's default client
    #[arg(long)]
    client: Option<String>,

    /// Override the scenario's hysteresis window
    #[arg(long)]
    hysteresis_secs: Option<u64>,

    /// Only print records for this client
    #[arg(long)]
    only: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tier_replay=info,tiering=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut scenario = Scenario::load(&args.scenario)?;
    if let Some(client) = args.client {
        scenario.client = client;
    }
    if let Some(secs) = args.hysteresis_secs {
        scenario.config.hysteresis = std::time::Duration::from_secs(secs);
    }
    info!(path = %args.scenario.display(), "Loaded scenario");

    let mut records = replay(&scenario).await?;
    if let Some(ref only) = args.only {
        records.retain(|r| &r.client_id == only);
    }

    let out = to_json_lines(&records)?;
    std::io::stdout()
        .lock()
        .write_all(out.as_bytes())
        .context("writing replay output")?;
    Ok(())
}
