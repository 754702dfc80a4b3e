use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod adapter;
mod asset;
mod chain;
mod config;
mod dex;
mod display;
mod engine;
mod errors;
mod executor;
mod graph;
mod health;
mod planner;
mod quote;
mod stats;

use chain::ogmios::OgmiosClient;
use chain::ChainClient;
use config::EngineConfig;
use engine::Engine;
use executor::EnvelopeSigner;
use health::ChainHealth;

#[derive(Parser)]
#[command(name = "cardano-arb")]
#[command(about = "Cardano Cross-DEX Arbitrage Engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detection loop (default)
    Run {
        /// Submit plans for execution. Without a key-holding signing
        /// collaborator wired in, submissions are rejected by the node.
        #[arg(long, default_value = "false")]
        execute: bool,
    },

    /// One-shot refresh, detection, and report
    Scan,

    /// Verify the Ogmios endpoint and chain position
    Health,

    /// List the pools currently visible per DEX
    Pools,
}

fn build_engine(config: EngineConfig) -> Arc<Engine> {
    let client: Arc<dyn ChainClient> = Arc::new(OgmiosClient::new(config.ogmios_url.clone()));
    Arc::new(Engine::new(config, client, Arc::new(EnvelopeSigner)))
}

async fn run_loop(config: EngineConfig, execute: bool) -> Result<()> {
    let engine = build_engine(config);
    engine.run(execute).await
}

async fn run_scan(config: EngineConfig) -> Result<()> {
    let engine = build_engine(config);
    let opportunities = engine.plan_opportunities().await?;
    display::print_snapshot(&engine.builder().current());
    display::print_opportunities(&opportunities);
    Ok(())
}

async fn run_health(config: EngineConfig) -> Result<()> {
    let client = OgmiosClient::new(config.ogmios_url.clone());
    info!(url = %config.ogmios_url, "checking chain collaborator");
    let health = ChainHealth::check(&client).await?;
    health.print();
    Ok(())
}

async fn run_pools(config: EngineConfig) -> Result<()> {
    let engine = build_engine(config);
    // Detection output is discarded; the refresh publishes the snapshot.
    engine.plan_opportunities().await?;
    display::print_snapshot(&engine.builder().current());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = EngineConfig::from_env();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { execute }) => run_loop(config, execute).await,
        None => run_loop(config, false).await,
        Some(Commands::Scan) => run_scan(config).await,
        Some(Commands::Health) => run_health(config).await,
        Some(Commands::Pools) => run_pools(config).await,
    }
}
