use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::types::{
    ClosedTrade, CoinPerformance, CycleRecord, PerformanceReport, Portfolio, PortfolioPerformance,
    Signal, TradePerformance, TradingActivity,
};

/// Computes a `PerformanceReport` from trade/cycle history and the current
/// portfolio snapshot (spec.md §6 `POST /api/performance/refresh`). Grounded
/// on the teacher's `AnalyticsCalculator::calculate` — the per-trade
/// aggregation and win/loss/by-coin breakdown survive, but the
/// streak/drawdown/rolling-return/histogram sections it computed have no
/// counterpart in `PerformanceReport` and are dropped in favor of the
/// decision-activity section the cycle history makes possible instead.
pub struct PerformanceAnalyzer;

impl PerformanceAnalyzer {
    pub fn analyze(cycles: &[CycleRecord], trades: &[ClosedTrade], portfolio: &Portfolio, window_cycles: usize) -> PerformanceReport {
        let window: Vec<&CycleRecord> = cycles.iter().rev().take(window_cycles).collect();

        PerformanceReport {
            generated_at: portfolio.last_updated,
            analysis_window_cycles: window.len(),
            total_cycles: cycles.len(),
            trading_activity: trading_activity(&window),
            trade_performance: trade_performance(trades),
            portfolio_performance: portfolio_performance(portfolio),
            coin_performance: coin_performance(trades),
        }
    }
}

fn trading_activity(window: &[&CycleRecord]) -> TradingActivity {
    let mut entry_signals = 0u64;
    let mut hold_signals = 0u64;
    let mut close_signals = 0u64;
    let mut total_decisions = 0u64;

    for cycle in window {
        for decision in cycle.decisions.values() {
            total_decisions += 1;
            match decision.signal {
                Signal::BuyToEnter | Signal::SellToEnter => entry_signals += 1,
                Signal::Hold => hold_signals += 1,
                Signal::ClosePosition => close_signals += 1,
            }
        }
    }

    let decision_rate_pct = if total_decisions == 0 {
        Decimal::ZERO
    } else {
        Decimal::from(entry_signals + close_signals) / Decimal::from(total_decisions) * Decimal::from(100)
    };

    TradingActivity { total_decisions, entry_signals, hold_signals, close_signals, decision_rate_pct }
}

fn trade_performance(trades: &[ClosedTrade]) -> TradePerformance {
    let total_trades = trades.len() as u64;
    let winning_trades = trades.iter().filter(|t| t.realized_pnl > Decimal::ZERO).count() as u64;
    let losing_trades = trades.iter().filter(|t| t.realized_pnl < Decimal::ZERO).count() as u64;
    let break_even_trades = total_trades - winning_trades - losing_trades;

    let total_pnl: Decimal = trades.iter().map(|t| t.realized_pnl).sum();
    let average_pnl = if total_trades == 0 { Decimal::ZERO } else { total_pnl / Decimal::from(total_trades) };
    let win_rate_pct = if total_trades == 0 { Decimal::ZERO } else { Decimal::from(winning_trades) / Decimal::from(total_trades) * Decimal::from(100) };

    let gross_profit: Decimal = trades.iter().map(|t| t.realized_pnl).filter(|pnl| *pnl > Decimal::ZERO).sum();
    let gross_loss: Decimal = trades.iter().map(|t| t.realized_pnl).filter(|pnl| *pnl < Decimal::ZERO).sum::<Decimal>().abs();
    let profit_factor = if gross_loss.is_zero() { None } else { Some(gross_profit / gross_loss) };

    let largest_win = trades.iter().map(|t| t.realized_pnl).fold(Decimal::ZERO, Decimal::max);
    let largest_loss = trades.iter().map(|t| t.realized_pnl).fold(Decimal::ZERO, Decimal::min);

    TradePerformance {
        total_trades,
        winning_trades,
        losing_trades,
        break_even_trades,
        win_rate_pct,
        total_pnl,
        average_pnl,
        profit_factor,
        largest_win,
        largest_loss,
    }
}

fn portfolio_performance(portfolio: &Portfolio) -> PortfolioPerformance {
    PortfolioPerformance {
        initial_balance: portfolio.initial_balance,
        current_balance: portfolio.current_balance,
        total_value: portfolio.total_value,
        total_return_pct: portfolio.total_return_pct,
        sharpe_ratio: portfolio.sharpe_ratio,
        open_positions: portfolio.position_count(),
    }
}

fn coin_performance(trades: &[ClosedTrade]) -> HashMap<String, CoinPerformance> {
    let mut by_coin: HashMap<String, CoinPerformance> = HashMap::new();

    for trade in trades {
        let entry = by_coin.entry(trade.symbol.as_str().to_string()).or_default();
        entry.trades += 1;
        entry.total_pnl += trade.realized_pnl;
        if trade.realized_pnl > Decimal::ZERO {
            entry.wins += 1;
        } else if trade.realized_pnl < Decimal::ZERO {
            entry.losses += 1;
        }
    }

    for perf in by_coin.values_mut() {
        perf.win_rate_pct = if perf.trades == 0 { Decimal::ZERO } else { Decimal::from(perf.wins) / Decimal::from(perf.trades) * Decimal::from(100) };
        perf.average_pnl = if perf.trades == 0 { Decimal::ZERO } else { perf.total_pnl / Decimal::from(perf.trades) };
    }

    by_coin
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CloseReason, Direction, Symbol};
    use rust_decimal_macros::dec;

    fn trade(symbol: &str, pnl: Decimal) -> ClosedTrade {
        ClosedTrade {
            symbol: Symbol::new(symbol),
            direction: Direction::Long,
            entry_price: dec!(100),
            exit_price: dec!(100),
            quantity: dec!(1),
            notional_usd: dec!(100),
            realized_pnl: pnl,
            leverage: 10,
            entry_time: chrono::Utc::now(),
            exit_time: chrono::Utc::now(),
            close_reason: CloseReason::AiClose,
        }
    }

    #[test]
    fn trade_performance_splits_wins_and_losses() {
        let trades = vec![trade("BTC", dec!(10)), trade("BTC", dec!(-4)), trade("ETH", dec!(0))];
        let perf = trade_performance(&trades);
        assert_eq!(perf.total_trades, 3);
        assert_eq!(perf.winning_trades, 1);
        assert_eq!(perf.losing_trades, 1);
        assert_eq!(perf.break_even_trades, 1);
        assert_eq!(perf.total_pnl, dec!(6));
    }

    #[test]
    fn coin_performance_groups_by_symbol() {
        let trades = vec![trade("BTC", dec!(10)), trade("BTC", dec!(-4)), trade("ETH", dec!(5))];
        let by_coin = coin_performance(&trades);
        assert_eq!(by_coin.get("BTC").unwrap().trades, 2);
        assert_eq!(by_coin.get("ETH").unwrap().trades, 1);
    }

    #[test]
    fn profit_factor_is_none_with_no_losses() {
        let trades = vec![trade("BTC", dec!(10))];
        let perf = trade_performance(&trades);
        assert_eq!(perf.profit_factor, None);
    }
}
