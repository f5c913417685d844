mod analytics;
mod config;
mod decision;
mod error;
mod exchange;
mod exit_monitor;
mod indicators;
mod llm;
mod market_data;
mod portfolio;
mod risk;
mod scheduler;
mod store;
mod types;
mod web;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::RwLock;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{load_config, EngineConfig};
use exchange::{BinanceFuturesClient, ExchangeAdapter, NoopExchangeAdapter};
use llm::{DeepSeekClient, LlmAdapter};
use market_data::MarketDataProvider;
use portfolio::PortfolioLedger;
use scheduler::CycleScheduler;
use store::StateStore;
use types::{Symbol, TradingMode};
use web::{start_admin_server, AppState};

#[derive(Parser)]
#[command(name = "perp-trader")]
#[command(version = "0.1.0")]
#[command(about = "Autonomous LLM-driven perpetual-futures trading engine", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let engine_config = load_config(&cli.config)?;
    info!(mode = ?engine_config.trading_mode, coins = ?engine_config.coins, "loaded configuration");

    run(engine_config).await
}

async fn run(engine_config: EngineConfig) -> Result<()> {
    let store = Arc::new(StateStore::new(engine_config.store.data_dir.clone()));
    let portfolio = store.load_portfolio(engine_config.initial_balance)?;
    let ledger = PortfolioLedger::from_portfolio(portfolio);

    let config = Arc::new(RwLock::new(engine_config.clone()));

    let coins: Vec<Symbol> = engine_config.coins.iter().map(Symbol::new).collect();

    let (exchange, market_data): (Arc<dyn ExchangeAdapter>, Arc<MarketDataProvider>) =
        match engine_config.trading_mode {
            TradingMode::Live => {
                let client = Arc::new(BinanceFuturesClient::new(&engine_config.exchange));
                client.preload_symbol_filters(&coins).await?;
                (client.clone(), Arc::new(MarketDataProvider::new(client)))
            }
            TradingMode::Simulation => {
                let client = Arc::new(BinanceFuturesClient::new(&engine_config.exchange));
                client.preload_symbol_filters(&coins).await?;
                (Arc::new(NoopExchangeAdapter), Arc::new(MarketDataProvider::new(client)))
            }
        };

    let risk = Arc::new(risk::RiskManager::new(Arc::clone(&config)));
    let validator = Arc::new(decision::DecisionValidator::new(Arc::clone(&config)));
    let exit_monitor = Arc::new(exit_monitor::ExitMonitor::new(Arc::clone(&config)));

    let llm_client = Arc::new(DeepSeekClient::new(
        engine_config.llm.endpoint.clone(),
        engine_config.llm.api_key.clone().unwrap_or_default(),
        engine_config.llm.model.clone(),
    ));
    let llm = Arc::new(LlmAdapter::new(llm_client, Arc::clone(&config)));

    let scheduler = Arc::new(CycleScheduler::new(
        Arc::clone(&config),
        ledger,
        market_data,
        risk,
        validator,
        exit_monitor,
        llm,
        exchange,
        Arc::clone(&store),
    ));

    let bind_addr: std::net::SocketAddr = engine_config.web.bind_addr.parse()?;
    let app_state = AppState::new(Arc::clone(&scheduler), Arc::clone(&store));

    let web_handle = tokio::spawn(async move {
        if let Err(err) = start_admin_server(app_state, bind_addr).await {
            error!(error = %err, "admin HTTP surface terminated");
        }
    });

    info!(bind_addr = %engine_config.web.bind_addr, "admin HTTP surface listening");

    let decision_handle = tokio::spawn(Arc::clone(&scheduler).run_decision_loop());
    let exit_monitor_handle = tokio::spawn(Arc::clone(&scheduler).run_exit_monitor_loop());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = decision_handle => {
            error!("decision loop exited unexpectedly");
        }
        _ = exit_monitor_handle => {
            error!("exit monitor loop exited unexpectedly");
        }
        _ = web_handle => {
            error!("admin HTTP surface exited unexpectedly");
        }
    }

    let portfolio = scheduler.ledger.snapshot().await;
    store.save_portfolio(&portfolio)?;
    info!("portfolio persisted, shutting down");

    Ok(())
}
