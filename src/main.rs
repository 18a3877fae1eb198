use std::sync::Arc;

use anyhow::Context;
use bulwark::adapter::{JsonlJournal, MomentumDecisions, PaperGateway, SimMarket};
use bulwark::config::Config;
use bulwark::engine::{AppState, Engine, Ledger};
use bulwark::risk::{CircuitBreaker, ProtectionRegistry, RiskLimits, RiskManager};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Wire the engine over the simulation adapters: seeded market walk,
/// paper gateway, momentum decisions, JSONL journal.
fn build_engine(config: &Config) -> anyhow::Result<Engine> {
    let market = Arc::new(SimMarket::new(&config.sim));
    let gateway = Arc::new(PaperGateway::new(Arc::clone(&market)));
    let journal = Arc::new(
        JsonlJournal::open(&config.journal.path)
            .with_context(|| format!("opening journal at {}", config.journal.path.display()))?,
    );

    let limits: RiskLimits = config.risk.clone().into();
    let ledger = JsonlJournal::last_checkpoint(&config.journal.path)
        .context("reading journal checkpoint")?
        .unwrap_or_else(|| Ledger::starting(config.sim.initial_balance));
    info!(balance = %ledger.balance, "Ledger ready");

    let state = Arc::new(AppState::new(
        ledger,
        CircuitBreaker::new(limits.daily_loss_limit, limits.daily_loss_limit_pct),
    ));
    let protection = Arc::new(ProtectionRegistry::new(
        Arc::clone(&state),
        gateway.clone(),
        market.clone(),
        journal.clone(),
        limits.clone(),
        config.engine.gateway_policy(),
    ));
    let risk = Arc::new(RiskManager::new(Arc::clone(&state), limits, protection));
    let decisions = Arc::new(MomentumDecisions::default());

    Ok(Engine::new(
        config.engine.clone(),
        state,
        risk,
        market,
        decisions,
        gateway,
        journal,
    ))
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = match Config::load("config.toml") {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    config.init_logging();
    info!("bulwark starting");

    let engine = match build_engine(&config) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "Failed to build engine");
            std::process::exit(1);
        }
    };

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::select! {
        result = engine.run(shutdown_rx) => {
            if let Err(e) = result {
                error!(error = %e, "Fatal error");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("bulwark stopped");
}
