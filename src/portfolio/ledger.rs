use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{info, warn};

use crate::config::DecisionSettings;
use crate::error::{EngineError, EngineResult};
use crate::types::{
    AiDecision, ClosedTrade, CloseReason, Direction, ExitPlan, IndicatorBundle, Portfolio, Position,
    PositionStatus, Symbol, TrailingState, Trend, TrendContext, TrendState,
};

/// Business operations over the `Portfolio` aggregate, grounded on
/// `PortfolioManager` in the original (`update_prices`, `add_to_history`,
/// `update_directional_bias`, `update_trend_state`,
/// `_estimate_liquidation_price`). Shares the teacher's
/// `Arc<RwLock<Portfolio>>` ownership idiom from
/// `engine::paper::PaperTradingEngine`, since the ledger is the single
/// cross-task mutable resource spec.md §5 names.
#[derive(Clone)]
pub struct PortfolioLedger {
    portfolio: Arc<RwLock<Portfolio>>,
}

impl PortfolioLedger {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            portfolio: Arc::new(RwLock::new(Portfolio::new(initial_balance))),
        }
    }

    pub fn from_portfolio(portfolio: Portfolio) -> Self {
        Self {
            portfolio: Arc::new(RwLock::new(portfolio)),
        }
    }

    pub fn handle(&self) -> Arc<RwLock<Portfolio>> {
        Arc::clone(&self.portfolio)
    }

    pub async fn snapshot(&self) -> Portfolio {
        self.portfolio.read().await.clone()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Portfolio> {
        self.portfolio.read().await
    }

    /// Marks every open position to the latest price, recomputes total
    /// value/return/Sharpe, and (optionally) advances each position's
    /// stall-loss-cycle counter — mirrors `update_prices`.
    pub async fn mark_to_market(&self, prices: &HashMap<Symbol, Decimal>, increment_loss_counters: bool) {
        let mut portfolio = self.portfolio.write().await;

        for (symbol, position) in portfolio.positions.iter_mut() {
            let Some(price) = prices.get(symbol) else { continue };
            if price.is_zero() || price.is_sign_negative() {
                warn!(coin = %symbol, %price, "skipping mark-to-market on non-positive price");
                continue;
            }

            position.mark_to_market(*price);

            if increment_loss_counters {
                if position.unrealized_pnl <= Decimal::ZERO {
                    position.loss_cycle_count += 1;
                } else {
                    position.loss_cycle_count = 0;
                }
            }
        }

        portfolio.recompute_total_value();
        portfolio.record_value_sample();
        portfolio.sharpe_ratio = calculate_sharpe_ratio(&portfolio.portfolio_values_history.iter().copied().collect::<Vec<_>>());
    }

    /// Opens a new position after risk/decision gates have already
    /// approved it — deducts margin from cash and inserts the `Position`.
    pub async fn apply_entry(&self, position: Position) -> EngineResult<()> {
        let mut portfolio = self.portfolio.write().await;

        if portfolio.current_balance < position.margin_usd {
            return Err(EngineError::risk_rejected(
                position.symbol.as_str(),
                "insufficient cash for margin at entry application",
            ));
        }

        portfolio.current_balance -= position.margin_usd;
        info!(coin = %position.symbol, margin = %position.margin_usd, direction = ?position.direction, "position opened");
        portfolio.positions.insert(position.symbol.clone(), position);
        portfolio.recompute_total_value();
        Ok(())
    }

    /// Closes `fraction` (0 < fraction <= 1) of the open position at
    /// `exit_price`, returning the realized trade. `fraction == 1`
    /// removes the position entirely; anything less shrinks it in place
    /// (spec.md §4.6 partial-profit-taking).
    pub async fn apply_exit(
        &self,
        symbol: &Symbol,
        exit_price: Decimal,
        fraction: Decimal,
        reason: CloseReason,
    ) -> EngineResult<Option<ClosedTrade>> {
        let fraction = fraction.clamp(Decimal::ZERO, Decimal::ONE);
        if fraction.is_zero() {
            return Ok(None);
        }

        let mut portfolio = self.portfolio.write().await;
        let Some(position) = portfolio.positions.get(symbol).cloned() else {
            return Ok(None);
        };

        let realized_qty = position.quantity * fraction;
        let realized_pnl = match position.direction {
            Direction::Long => (exit_price - position.entry_price) * realized_qty,
            Direction::Short => (position.entry_price - exit_price) * realized_qty,
        };
        let margin_released = position.margin_usd * fraction;

        portfolio.current_balance += margin_released + realized_pnl;

        let trade = ClosedTrade {
            symbol: symbol.clone(),
            direction: position.direction,
            entry_price: position.entry_price,
            exit_price,
            quantity: realized_qty,
            notional_usd: realized_qty * exit_price,
            realized_pnl,
            leverage: position.leverage,
            entry_time: position.entry_time,
            exit_time: Utc::now(),
            close_reason: reason,
        };

        let full_close = fraction >= Decimal::ONE;
        if full_close {
            portfolio.positions.remove(symbol);
        } else if let Some(remaining) = portfolio.positions.get_mut(symbol) {
            remaining.quantity -= realized_qty;
            remaining.margin_usd -= margin_released;
            remaining.mark_to_market(exit_price);
        }

        portfolio.trade_count += 1;
        let bias = portfolio.directional_bias.entry(position.direction).or_default();
        bias.record(realized_pnl);

        portfolio.recompute_total_value();
        info!(coin = %symbol, %realized_pnl, %fraction, ?reason, "position exit applied");
        Ok(Some(trade))
    }

    /// Classifies the 4h trend for `coin` and advances flip/cooldown
    /// bookkeeping — mirrors `update_trend_state`, including the 3-minute
    /// intraday override that can pull a flip back to `neutral`.
    pub async fn update_trend_state(
        &self,
        coin: &Symbol,
        cycle_number: u64,
        primary: &IndicatorBundle,
        intraday: Option<&IndicatorBundle>,
        settings: &DecisionSettings,
    ) -> TrendContext {
        let mut portfolio = self.portfolio.write().await;

        let trend = classify_trend(primary, intraday, settings);

        let state = portfolio.trend_states.entry(coin.clone()).or_insert_with(|| TrendState {
            trend,
            last_flip_cycle: cycle_number,
            last_seen_cycle: cycle_number,
        });

        if state.trend != trend {
            state.trend = trend;
            if trend != Trend::Neutral {
                state.last_flip_cycle = cycle_number;
            }
        }
        state.last_seen_cycle = cycle_number;

        TrendContext {
            trend_at_entry: trend,
            cycle_number,
        }
    }

    /// `entry_price × (1 ± (1/leverage − maintenance_margin_rate))`
    /// (spec.md §3), clamped to non-negative.
    pub fn estimate_liquidation_price(
        entry_price: Decimal,
        leverage: u32,
        direction: Direction,
        maintenance_margin_rate: Decimal,
    ) -> Decimal {
        if leverage <= 1 || entry_price.is_sign_negative() || entry_price.is_zero() {
            return Decimal::ZERO;
        }

        let imr = Decimal::ONE / Decimal::from(leverage);
        let margin_diff = imr - maintenance_margin_rate;
        if margin_diff <= Decimal::ZERO {
            warn!(%margin_diff, "liquidation estimate skipped: margin diff non-positive");
            return Decimal::ZERO;
        }

        let price = match direction {
            Direction::Long => entry_price * (Decimal::ONE - margin_diff),
            Direction::Short => entry_price * (Decimal::ONE + margin_diff),
        };
        price.max(Decimal::ZERO)
    }

    /// Builds a default `ExitPlan`/`Position` shell for a newly validated
    /// entry decision — callers (decision/risk) fill in margin/quantity
    /// before calling `apply_entry`.
    pub fn build_position(
        symbol: Symbol,
        direction: Direction,
        quantity: Decimal,
        entry_price: Decimal,
        leverage: u32,
        margin_usd: Decimal,
        decision: &AiDecision,
        maintenance_margin_rate: Decimal,
        trend_context: TrendContext,
    ) -> Position {
        let notional_usd = quantity * entry_price;
        let liquidation_price = Self::estimate_liquidation_price(entry_price, leverage, direction, maintenance_margin_rate);

        Position {
            symbol,
            direction,
            status: PositionStatus::Open,
            quantity,
            entry_price,
            current_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            notional_usd,
            margin_usd,
            leverage,
            liquidation_price,
            confidence: decision.confidence.unwrap_or(Decimal::ZERO),
            risk_usd: decision.risk_usd.unwrap_or(Decimal::ZERO),
            exit_plan: ExitPlan {
                profit_target: decision.profit_target,
                stop_loss: decision.stop_loss,
                invalidation_condition: decision.invalidation_condition.clone(),
            },
            trailing_state: TrailingState::default(),
            loss_cycle_count: 0,
            entry_time: Utc::now(),
            trend_context,
        }
    }
}

/// 4h trend with the 3-minute intraday neutral override (original
/// `update_trend_state`): a bearish 4h read gets pulled to neutral if the
/// 3m candle is above its EMA20 with RSI above the high threshold, and
/// symmetrically for bullish.
fn classify_trend(primary: &IndicatorBundle, intraday: Option<&IndicatorBundle>, settings: &DecisionSettings) -> Trend {
    let Some(ema20) = primary.ema20.value else { return Trend::Unknown };
    if ema20.is_zero() {
        return Trend::Unknown;
    }

    let delta = (primary.current_price - ema20) / ema20;
    let mut trend = if delta.abs() <= settings.ema_neutral_band_pct {
        Trend::Neutral
    } else if delta > Decimal::ZERO {
        Trend::Bullish
    } else {
        Trend::Bearish
    };

    if let Some(intraday) = intraday {
        if let Some(ema20_3m) = intraday.ema20.value.or(Some(intraday.current_price)) {
            let rsi_3m = intraday
                .rsi14
                .value
                .or_else(|| intraday.rsi7.as_ref().and_then(|s| s.value))
                .unwrap_or(dec_fifty());
            let intraday_trend = if intraday.current_price >= ema20_3m { Trend::Bullish } else { Trend::Bearish };

            if trend == Trend::Bearish && intraday_trend == Trend::Bullish && rsi_3m >= settings.intraday_neutral_rsi_high {
                trend = Trend::Neutral;
            } else if trend == Trend::Bullish && intraday_trend == Trend::Bearish && rsi_3m <= settings.intraday_neutral_rsi_low {
                trend = Trend::Neutral;
            }
        }
    }

    trend
}

fn dec_fifty() -> Decimal {
    Decimal::from(50)
}

/// Daily Sharpe ratio from cycle-over-cycle portfolio value changes,
/// annualized by 720 cycles/day (Nof1ai-style, per original
/// `calculate_sharpe_ratio`) at a 0% risk-free rate.
pub fn calculate_sharpe_ratio(values: &[Decimal]) -> Decimal {
    const CYCLES_PER_DAY: i64 = 720;

    if values.len() < 2 {
        return Decimal::ZERO;
    }

    let returns: Vec<Decimal> = values
        .windows(2)
        .filter_map(|pair| {
            let (prev, curr) = (pair[0], pair[1]);
            if prev.is_zero() {
                None
            } else {
                Some((curr - prev) / prev)
            }
        })
        .collect();

    if returns.len() < 2 {
        return Decimal::ZERO;
    }

    let n = Decimal::from(returns.len() as u64);
    let mean: Decimal = returns.iter().sum::<Decimal>() / n;
    let variance: Decimal = returns.iter().map(|r| (*r - mean) * (*r - mean)).sum::<Decimal>() / n;
    let std_dev = sqrt_approx(variance);

    let avg_return = mean * Decimal::from(CYCLES_PER_DAY);
    let std_return = std_dev * sqrt_approx(Decimal::from(CYCLES_PER_DAY));

    if std_return.is_zero() {
        return Decimal::ZERO;
    }

    avg_return / std_return
}

fn sqrt_approx(value: Decimal) -> Decimal {
    if value.is_zero() || value.is_sign_negative() {
        return Decimal::ZERO;
    }
    let mut guess = value / Decimal::from(2);
    if guess.is_zero() {
        guess = Decimal::ONE;
    }
    for _ in 0..50 {
        let next = (guess + value / guess) / Decimal::from(2);
        if (next - guess).abs() < Decimal::new(1, 10) {
            return next;
        }
        guess = next;
    }
    guess
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Symbol;
    use rust_decimal_macros::dec;

    fn sample_decision() -> AiDecision {
        AiDecision {
            signal: crate::types::Signal::BuyToEnter,
            leverage: Some(10),
            confidence: Some(dec!(0.7)),
            profit_target: Some(dec!(110)),
            stop_loss: Some(dec!(90)),
            risk_usd: Some(dec!(5)),
            invalidation_condition: None,
            justification: Some("test".into()),
        }
    }

    #[tokio::test]
    async fn apply_entry_deducts_margin_from_cash() {
        let ledger = PortfolioLedger::new(dec!(1000));
        let decision = sample_decision();
        let position = PortfolioLedger::build_position(
            Symbol::new("BTC"),
            Direction::Long,
            dec!(1),
            dec!(100),
            10,
            dec!(10),
            &decision,
            dec!(0.005),
            TrendContext { trend_at_entry: Trend::Bullish, cycle_number: 1 },
        );

        ledger.apply_entry(position).await.unwrap();
        let snapshot = ledger.snapshot().await;
        assert_eq!(snapshot.current_balance, dec!(990));
        assert!(snapshot.has_position(&Symbol::new("BTC")));
    }

    #[tokio::test]
    async fn full_exit_removes_position_and_realizes_pnl() {
        let ledger = PortfolioLedger::new(dec!(1000));
        let decision = sample_decision();
        let position = PortfolioLedger::build_position(
            Symbol::new("BTC"),
            Direction::Long,
            dec!(1),
            dec!(100),
            10,
            dec!(10),
            &decision,
            dec!(0.005),
            TrendContext { trend_at_entry: Trend::Bullish, cycle_number: 1 },
        );
        ledger.apply_entry(position).await.unwrap();

        let trade = ledger
            .apply_exit(&Symbol::new("BTC"), dec!(110), Decimal::ONE, CloseReason::TakeProfit)
            .await
            .unwrap()
            .expect("trade realized");

        assert_eq!(trade.realized_pnl, dec!(10));
        let snapshot = ledger.snapshot().await;
        assert!(!snapshot.has_position(&Symbol::new("BTC")));
        assert_eq!(snapshot.current_balance, dec!(1020));
    }

    #[tokio::test]
    async fn partial_exit_shrinks_position_in_place() {
        let ledger = PortfolioLedger::new(dec!(1000));
        let decision = sample_decision();
        let position = PortfolioLedger::build_position(
            Symbol::new("BTC"),
            Direction::Long,
            dec!(2),
            dec!(100),
            10,
            dec!(20),
            &decision,
            dec!(0.005),
            TrendContext { trend_at_entry: Trend::Bullish, cycle_number: 1 },
        );
        ledger.apply_entry(position).await.unwrap();

        let trade = ledger
            .apply_exit(&Symbol::new("BTC"), dec!(110), dec!(0.5), CloseReason::PartialProfit)
            .await
            .unwrap()
            .expect("partial trade realized");

        assert_eq!(trade.quantity, dec!(1));
        let snapshot = ledger.snapshot().await;
        let remaining = snapshot.positions.get(&Symbol::new("BTC")).unwrap();
        assert_eq!(remaining.quantity, dec!(1));
        assert_eq!(remaining.margin_usd, dec!(10));
    }

    #[test]
    fn liquidation_price_moves_against_direction() {
        let long_liq = PortfolioLedger::estimate_liquidation_price(dec!(100), 10, Direction::Long, dec!(0.005));
        let short_liq = PortfolioLedger::estimate_liquidation_price(dec!(100), 10, Direction::Short, dec!(0.005));
        assert!(long_liq < dec!(100));
        assert!(short_liq > dec!(100));
    }

    #[test]
    fn sharpe_ratio_is_zero_with_insufficient_history() {
        assert_eq!(calculate_sharpe_ratio(&[dec!(100)]), Decimal::ZERO);
        assert_eq!(calculate_sharpe_ratio(&[dec!(100), dec!(100)]), Decimal::ZERO);
    }
}
