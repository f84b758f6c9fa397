use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use runwar::{
    config::GameConfig,
    notify::LogNotifier,
    scenario::{run_scenario, ScenarioLoader},
    service::TerritoryService,
    snapshot::{SnapshotWriter, TerritorySnapshot},
    store::InMemoryTileStore,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "runwar territory scenario runner")]
struct Cli {
    /// Path to the scenario YAML file
    #[arg(long, default_value = "scenarios/curitiba.yaml")]
    scenario: PathBuf,

    /// Game rules YAML (built-in defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the final territory snapshot
    #[arg(long, default_value = "snapshots")]
    snapshot_dir: PathBuf,

    /// Run a decay sweep this many days after the scenario start
    #[arg(long)]
    decay_after_days: Option<i64>,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => GameConfig::from_yaml(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => GameConfig::default(),
    };
    init_tracing(&config.logging.level);

    let scenario = ScenarioLoader::new(".").load(&cli.scenario)?;
    let store = Arc::new(InMemoryTileStore::new());
    let service = Arc::new(
        TerritoryService::new(&config, store, Arc::new(LogNotifier))
            .context("Failed to build territory service")?,
    );
    info!(scenario = %scenario.name, runs = scenario.runs.len(), "starting scenario");

    let runs = tokio::select! {
        runs = run_scenario(&scenario, Arc::clone(&service)) => runs?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted before the scenario finished, no snapshot written");
            return Ok(());
        }
    };

    let mut taken_at = runs_end(&scenario);
    if let Some(days) = cli.decay_after_days {
        taken_at = scenario.start + Duration::days(days);
        service
            .run_decay_at(taken_at)
            .await
            .context("Decay sweep failed")?;
    }

    let applied = runs.iter().filter(|run| run.action.is_some()).count();
    let takeovers = runs.iter().filter(|run| run.owner_changed).count();
    let snapshot = TerritorySnapshot::capture(&scenario.name, &*service, runs, taken_at)
        .await
        .context("Failed to capture territory state")?;
    let path = SnapshotWriter::new(&cli.snapshot_dir)
        .write(&snapshot)
        .context("Failed to write snapshot")?;

    println!(
        "Scenario '{}' finished: {} of {} runs applied, {} ownership changes, {} tiles held. Snapshot: {}",
        scenario.name,
        applied,
        scenario.runs.len(),
        takeovers,
        snapshot.tiles.iter().filter(|tile| !tile.is_neutral()).count(),
        path.display()
    );
    Ok(())
}

fn runs_end(scenario: &runwar::scenario::Scenario) -> chrono::DateTime<chrono::Utc> {
    let last_offset = scenario
        .runs
        .iter()
        .map(|run| run.offset_minutes)
        .max()
        .unwrap_or(0);
    scenario.start + Duration::minutes(last_offset) + Duration::hours(1)
}
