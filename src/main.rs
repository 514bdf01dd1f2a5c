//! hldesk entry point.

use clap::{Parser, Subcommand};
use hldesk::aggregator::Aggregator;
use hldesk::ai::{AiEngine, LlmClient};
use hldesk::api::{self, AppState};
use hldesk::cache::RateCache;
use hldesk::config::Config;
use hldesk::paper::PaperEngine;
use hldesk::poller;
use hldesk::sampler::Sampler;
use hldesk::store::Store;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hldesk")]
#[command(about = "Funding-rate aggregation desk with paper-trading and AI trader simulation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the poll loop and HTTP API (the default)
    Serve,
    /// Print the current top spreads
    Funding {
        /// Number of spreads to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Record one equity snapshot for every portfolio and agent
    Snapshot,
    /// Run one AI trader cycle and print the decision
    RunAgent {
        /// Agent name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Funding { limit } => show_funding(config, limit).await,
        Commands::Snapshot => run_snapshot(config).await,
        Commands::RunAgent { name } => run_agent(config, &name).await,
    }
}

fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let aggregator = Aggregator::new(config.poll.venue_timeout_secs)?;
    let cache = Arc::new(RateCache::new(aggregator));
    let store = Arc::new(Store::from_config(config.supabase.as_ref()));
    let llm = config
        .openrouter
        .as_ref()
        .map(LlmClient::new)
        .transpose()?;
    let ai = Arc::new(AiEngine::new(Arc::clone(&store), Arc::clone(&cache), llm));
    let sampler = Arc::new(Sampler::new(Arc::clone(&store), Arc::clone(&cache)));

    Ok(AppState {
        cache,
        store,
        ai,
        sampler,
    })
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("starting hldesk");

    let state = build_state(&config)?;
    let engine = Arc::new(PaperEngine::new(Arc::clone(&state.store)));

    poller::spawn_poll_loop(
        Arc::clone(&state.cache),
        Arc::clone(&state.store),
        engine,
        config.poll.interval_secs,
    );
    Arc::clone(&state.sampler).spawn_hourly();

    api::serve(state, config.server.port).await?;
    Ok(())
}

async fn show_funding(config: Config, limit: usize) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let agg = state.cache.get().await;

    println!(
        "{:<10} {:>12} {:>12} {:>10} {:>12}",
        "ASSET", "HL RATE 8H", "BEST CEX", "VENUE", "MAX SPREAD"
    );
    for spread in agg.spreads.iter().take(limit.clamp(1, 100)) {
        println!(
            "{:<10} {:>11.4}% {:>11.4}% {:>10} {:>11.4}%",
            spread.asset,
            spread.primary.rate_8h * dec!(100),
            spread.best_cex_rate.unwrap_or_default() * dec!(100),
            spread
                .best_cex
                .map(|v| v.to_string())
                .unwrap_or_else(|| "none".to_string()),
            spread.max_spread * dec!(100),
        );
    }
    println!("\n{} assets, fetched {}", agg.spreads.len(), agg.timestamp);
    Ok(())
}

async fn run_snapshot(config: Config) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let count = state.sampler.snapshot_all().await?;
    println!("snapshotted {count} owners");
    Ok(())
}

async fn run_agent(config: Config, name: &str) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let decision = state.ai.run_agent_cycle(name).await?;
    println!(
        "{name}: {:?} {} {} | {}",
        decision.action,
        decision.asset.as_deref().unwrap_or("-"),
        decision
            .size_usd
            .map(|s| format!("${s:.2}"))
            .unwrap_or_else(|| "-".to_string()),
        decision.reasoning,
    );
    Ok(())
}
