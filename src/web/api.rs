use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::analytics::PerformanceAnalyzer;
use crate::types::{AiDecision, BotControl, BotStatus, ManualOverride, Signal, Symbol};

use super::AppState;

const PERFORMANCE_WINDOW_CYCLES: usize = 50;

fn store_err(err: crate::error::EngineError) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() })))
}

pub async fn get_portfolio(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.ledger.snapshot().await)
}

pub async fn get_trades(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_trades() {
        Ok(trades) => Ok(Json(trades)),
        Err(err) => Err(store_err(err)),
    }
}

pub async fn get_cycles(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_cycles() {
        Ok(cycles) => Ok(Json(cycles)),
        Err(err) => Err(store_err(err)),
    }
}

pub async fn get_alerts(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_alerts() {
        Ok(alerts) => Ok(Json(alerts)),
        Err(err) => Err(store_err(err)),
    }
}

pub async fn get_performance(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_performance_reports() {
        Ok(reports) => Ok(Json(reports)),
        Err(err) => Err(store_err(err)),
    }
}

pub async fn post_performance_refresh(State(state): State<AppState>) -> impl IntoResponse {
    let cycles = match state.store.list_cycles() {
        Ok(c) => c,
        Err(err) => return Err(store_err(err)),
    };
    let trades = match state.store.list_trades() {
        Ok(t) => t,
        Err(err) => return Err(store_err(err)),
    };
    let portfolio = state.scheduler.ledger.snapshot().await;

    let report = PerformanceAnalyzer::analyze(&cycles, &trades, &portfolio, PERFORMANCE_WINDOW_CYCLES);

    if let Err(err) = state.store.append_performance_report(report.clone()) {
        return Err(store_err(err));
    }

    info!(window = report.analysis_window_cycles, "performance report refreshed");
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct ForceCloseRequest {
    pub coin: String,
}

pub async fn post_force_close(State(state): State<AppState>, Json(body): Json<ForceCloseRequest>) -> impl IntoResponse {
    let coin = Symbol::new(&body.coin);
    let mut decisions = HashMap::new();
    decisions.insert(coin.clone(), AiDecision { signal: Signal::ClosePosition, ..AiDecision::hold("manual force-close") });

    let override_doc = ManualOverride { timestamp: Utc::now(), decisions };
    match state.store.save_manual_override(&override_doc) {
        Ok(()) => {
            info!(coin = %coin, "manual override written: force-close requested");
            Ok(Json(json!({ "status": "accepted", "coin": coin.as_str() })))
        }
        Err(err) => {
            warn!(coin = %coin, error = %err, "failed to write manual override");
            Err(store_err(err))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotControlAction {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Deserialize)]
pub struct BotControlRequest {
    pub action: BotControlAction,
}

pub async fn post_bot_control(State(state): State<AppState>, Json(body): Json<BotControlRequest>) -> impl IntoResponse {
    let status = match body.action {
        BotControlAction::Pause => BotStatus::Paused,
        BotControlAction::Resume => BotStatus::Running,
        BotControlAction::Stop => BotStatus::Stopped,
    };
    let control = BotControl { status, last_updated: Utc::now(), action: Some(format!("{:?}", body.action)) };
    match state.store.save_bot_control(&control) {
        Ok(()) => {
            info!(status = ?control.status, "bot-control updated");
            Ok(Json(control))
        }
        Err(err) => Err(store_err(err)),
    }
}

pub async fn get_bot_control(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.load_bot_control() {
        Ok(control) => Ok(Json(control)),
        Err(err) => Err(store_err(err)),
    }
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::decision::DecisionValidator;
    use crate::error::EngineError;
    use crate::exchange::NoopExchangeAdapter;
    use crate::exit_monitor::ExitMonitor;
    use crate::llm::{DecisionMap, EngineSnapshot, LlmAdapter, LlmClient};
    use crate::market_data::{CandleSource, MarketDataProvider};
    use crate::portfolio::PortfolioLedger;
    use crate::risk::RiskManager;
    use crate::scheduler::CycleScheduler;
    use crate::types::{BotStatus, Candle, Symbol, TimeFrame};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct EmptyCandleSource;

    #[async_trait]
    impl CandleSource for EmptyCandleSource {
        async fn fetch_klines(&self, _symbol: &Symbol, _interval: TimeFrame, _limit: u32) -> Result<Vec<Candle>, EngineError> {
            Ok(Vec::new())
        }
        async fn open_interest(&self, _symbol: &Symbol) -> Result<Decimal, EngineError> {
            Ok(Decimal::ZERO)
        }
        async fn funding_rate(&self, _symbol: &Symbol) -> Result<Decimal, EngineError> {
            Ok(Decimal::ZERO)
        }
    }

    struct SilentLlmClient;

    #[async_trait]
    impl LlmClient for SilentLlmClient {
        async fn request_decisions(&self, _snapshot: &EngineSnapshot) -> Result<DecisionMap, EngineError> {
            Ok(DecisionMap::new())
        }
    }

    fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(crate::store::StateStore::new(dir.path()));
        let config = std::sync::Arc::new(tokio::sync::RwLock::new(EngineConfig::default()));
        let ledger = PortfolioLedger::new(dec!(2000));
        let market_data = std::sync::Arc::new(MarketDataProvider::new(std::sync::Arc::new(EmptyCandleSource)));
        let risk = std::sync::Arc::new(RiskManager::new(config.clone()));
        let validator = std::sync::Arc::new(DecisionValidator::new(config.clone()));
        let exit_monitor = std::sync::Arc::new(ExitMonitor::new(config.clone()));
        let llm = std::sync::Arc::new(LlmAdapter::new(std::sync::Arc::new(SilentLlmClient), config.clone()));
        let exchange: std::sync::Arc<dyn crate::exchange::ExchangeAdapter> = std::sync::Arc::new(NoopExchangeAdapter);

        let scheduler = std::sync::Arc::new(CycleScheduler::new(
            config, ledger, market_data, risk, validator, exit_monitor, llm, exchange, store.clone(),
        ));

        AppState::new(scheduler, store)
    }

    #[tokio::test]
    async fn get_portfolio_returns_seeded_balance() {
        let state = test_state();
        let portfolio = state.scheduler.ledger.snapshot().await;
        assert_eq!(portfolio.initial_balance, dec!(2000));
    }

    #[tokio::test]
    async fn force_close_writes_a_manual_override_for_the_requested_coin() {
        let state = test_state();
        let body = ForceCloseRequest { coin: "BTC".to_string() };

        let response = post_force_close(State(state.clone()), Json(body)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let override_doc = state.store.take_manual_override().unwrap().expect("override should be persisted");
        assert!(override_doc.decisions.contains_key(&Symbol::new("BTC")));
        assert_eq!(override_doc.decisions[&Symbol::new("BTC")].signal, Signal::ClosePosition);
    }

    #[tokio::test]
    async fn bot_control_round_trips_through_the_store() {
        let state = test_state();

        let response = post_bot_control(State(state.clone()), Json(BotControlRequest { action: BotControlAction::Pause }))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let control = state.store.load_bot_control().unwrap();
        assert_eq!(control.status, BotStatus::Paused);
    }

    #[tokio::test]
    async fn performance_refresh_appends_a_report_with_zero_history() {
        let state = test_state();

        let response = post_performance_refresh(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let reports = state.store.list_performance_reports().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].total_cycles, 0);
    }
}
