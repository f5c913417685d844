use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One entry of `performance_report.json` (spec.md §6), produced by the
/// performance analyzer on demand and read by the admin surface only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub analysis_window_cycles: usize,
    pub total_cycles: usize,
    pub trading_activity: TradingActivity,
    pub trade_performance: TradePerformance,
    pub portfolio_performance: PortfolioPerformance,
    pub coin_performance: HashMap<String, CoinPerformance>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingActivity {
    pub total_decisions: u64,
    pub entry_signals: u64,
    pub hold_signals: u64,
    pub close_signals: u64,
    pub decision_rate_pct: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradePerformance {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub break_even_trades: u64,
    pub win_rate_pct: Decimal,
    pub total_pnl: Decimal,
    pub average_pnl: Decimal,
    pub profit_factor: Option<Decimal>,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioPerformance {
    pub initial_balance: Decimal,
    pub current_balance: Decimal,
    pub total_value: Decimal,
    pub total_return_pct: Decimal,
    pub sharpe_ratio: Decimal,
    pub open_positions: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoinPerformance {
    pub trades: u64,
    pub total_pnl: Decimal,
    pub wins: u64,
    pub losses: u64,
    pub win_rate_pct: Decimal,
    pub average_pnl: Decimal,
}
