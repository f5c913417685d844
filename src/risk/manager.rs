use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::{EngineConfig, RiskSettings};
use crate::error::{EngineError, EngineResult};
use crate::types::{Direction, Portfolio, Symbol, Trend};

/// Pre-trade gate chain (spec.md §4.4), grounded on the teacher's
/// `can_open_position` ordered-check shape but replacing the checks with
/// the five the spec names: position count, minimum margin, cash floor,
/// same-direction saturation, concentration.
pub struct RiskManager {
    config: Arc<RwLock<EngineConfig>>,
}

impl RiskManager {
    pub fn new(config: Arc<RwLock<EngineConfig>>) -> Self {
        Self { config }
    }

    pub fn config_arc(&self) -> Arc<RwLock<EngineConfig>> {
        Arc::clone(&self.config)
    }

    /// Runs all five gates in order, short-circuiting on the first
    /// rejection. `margin_usd` is the already-sized margin for the
    /// prospective entry (see `calculate_margin`).
    pub async fn gate_entry(
        &self,
        portfolio: &Portfolio,
        coin: &Symbol,
        direction: Direction,
        margin_usd: Decimal,
        cycle_number: u64,
        market_regime: Trend,
    ) -> EngineResult<()> {
        let config = self.config.read().await;
        let limits = &config.risk;

        self.check_position_count(portfolio, coin, limits, cycle_number)?;
        self.check_minimum_margin(coin, margin_usd, limits)?;
        self.check_cash_floor(coin, portfolio, margin_usd, limits)?;
        self.check_same_direction_saturation(coin, portfolio, direction, market_regime, limits)?;
        self.check_concentration(coin, portfolio, margin_usd, limits)?;

        Ok(())
    }

    /// Gate 1 — position count capped at `min(cycle_number, max_positions)`,
    /// the scheduler's ramp-up rule (spec.md §4.7).
    fn check_position_count(
        &self,
        portfolio: &Portfolio,
        coin: &Symbol,
        limits: &RiskSettings,
        cycle_number: u64,
    ) -> EngineResult<()> {
        let cap = (cycle_number as usize).min(limits.max_positions).max(0);
        if portfolio.position_count() >= cap {
            return Err(EngineError::risk_rejected(
                coin.as_str(),
                format!("position count {} at or above ramp-up cap {cap}", portfolio.position_count()),
            ));
        }
        Ok(())
    }

    /// Gate 2 — margin must already meet the configured floor; callers are
    /// expected to promote it via `calculate_margin` before reaching here.
    fn check_minimum_margin(&self, coin: &Symbol, margin_usd: Decimal, limits: &RiskSettings) -> EngineResult<()> {
        if margin_usd < limits.min_position_margin_usd {
            return Err(EngineError::risk_rejected(
                coin.as_str(),
                format!("margin ${margin_usd} below minimum ${}", limits.min_position_margin_usd),
            ));
        }
        Ok(())
    }

    /// Gate 3 — post-deduction cash must remain at or above
    /// `cash_floor_pct` of the pre-trade balance.
    fn check_cash_floor(&self, coin: &Symbol, portfolio: &Portfolio, margin_usd: Decimal, limits: &RiskSettings) -> EngineResult<()> {
        let floor = portfolio.current_balance * limits.cash_floor_pct / Decimal::from(100);
        let remaining = portfolio.current_balance - margin_usd;
        if remaining < floor {
            return Err(EngineError::risk_rejected(
                coin.as_str(),
                format!("post-entry cash ${remaining} would fall below floor ${floor}"),
            ));
        }
        Ok(())
    }

    /// Gate 4 — refuse to add to an already-saturated directional bet when
    /// the overall regime agrees with that direction.
    fn check_same_direction_saturation(
        &self,
        coin: &Symbol,
        portfolio: &Portfolio,
        direction: Direction,
        market_regime: Trend,
        limits: &RiskSettings,
    ) -> EngineResult<()> {
        let regime_agrees = market_regime.agrees_with(direction);
        if regime_agrees {
            let count = portfolio.positions_in_direction(direction);
            if count >= limits.same_direction_limit {
                return Err(EngineError::risk_rejected(
                    coin.as_str(),
                    format!("{count} existing {direction:?} positions already at the same-direction limit while regime agrees"),
                ));
            }
        }
        Ok(())
    }

    /// Gate 5 — the prospective position's margin, as a share of
    /// `current_balance + Σ margin_usd`, may not exceed `concentration_pct`.
    fn check_concentration(&self, coin: &Symbol, portfolio: &Portfolio, margin_usd: Decimal, limits: &RiskSettings) -> EngineResult<()> {
        let pct = portfolio.concentration_pct(margin_usd);
        if pct > limits.concentration_pct {
            return Err(EngineError::risk_rejected(
                coin.as_str(),
                format!("prospective concentration {pct:.2}% exceeds cap {}%", limits.concentration_pct),
            ));
        }
        Ok(())
    }

    /// Confidence-based margin sizing (spec.md §4.4):
    /// `clamp(available_cash × 0.40 × confidence, MIN_MARGIN, …)`, scaled
    /// by the market-regime multiplier, then halved again on the
    /// "partial margin" path from C5.
    pub async fn calculate_margin(
        &self,
        available_cash: Decimal,
        confidence: Decimal,
        regime: Trend,
        partial_margin: bool,
    ) -> Decimal {
        let config = self.config.read().await;
        let limits = &config.risk;

        let base = available_cash * limits.confidence_margin_fraction * confidence;
        let regime_key = match regime {
            Trend::Bullish => "BULLISH",
            Trend::Bearish => "BEARISH",
            Trend::Neutral | Trend::Unknown => "NEUTRAL",
        };
        let regime_multiplier = limits
            .market_regime_multipliers
            .get(regime_key)
            .copied()
            .unwrap_or(Decimal::ONE);

        let mut margin = base * regime_multiplier;
        if partial_margin {
            margin *= limits.partial_margin_multiplier;
        }

        let margin = margin.max(limits.min_position_margin_usd);
        debug!(%confidence, %regime_multiplier, %partial_margin, %margin, "sized confidence-based margin");
        margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;
    use rust_decimal_macros::dec;

    fn config_handle() -> Arc<RwLock<EngineConfig>> {
        Arc::new(RwLock::new(EngineConfig::default()))
    }

    #[tokio::test]
    async fn gate_rejects_when_position_count_at_ramp_up_cap() {
        let manager = RiskManager::new(config_handle());
        let portfolio = Portfolio::new(dec!(1000));
        let result = manager
            .gate_entry(&portfolio, &Symbol::new("BTC"), Direction::Long, dec!(10), 0, Trend::Neutral)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn gate_rejects_margin_below_minimum() {
        let manager = RiskManager::new(config_handle());
        let portfolio = Portfolio::new(dec!(1000));
        let result = manager
            .gate_entry(&portfolio, &Symbol::new("BTC"), Direction::Long, dec!(1), 5, Trend::Neutral)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn gate_rejects_when_cash_floor_breached() {
        let manager = RiskManager::new(config_handle());
        let portfolio = Portfolio::new(dec!(100));
        let result = manager
            .gate_entry(&portfolio, &Symbol::new("BTC"), Direction::Long, dec!(95), 5, Trend::Neutral)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn gate_rejects_same_direction_saturation_when_regime_agrees() {
        let manager = RiskManager::new(config_handle());
        let mut portfolio = Portfolio::new(dec!(10000));
        for i in 0..4 {
            let symbol = Symbol::new(format!("COIN{i}"));
            portfolio.positions.insert(
                symbol.clone(),
                sample_position(symbol, Direction::Long, dec!(50)),
            );
        }
        let result = manager
            .gate_entry(&portfolio, &Symbol::new("NEW"), Direction::Long, dec!(50), 10, Trend::Bullish)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn gate_allows_valid_entry() {
        let manager = RiskManager::new(config_handle());
        let portfolio = Portfolio::new(dec!(10000));
        let result = manager
            .gate_entry(&portfolio, &Symbol::new("BTC"), Direction::Long, dec!(50), 10, Trend::Neutral)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn calculate_margin_respects_floor_and_regime() {
        let manager = RiskManager::new(config_handle());
        let margin = manager.calculate_margin(dec!(1000), dec!(0.5), Trend::Bearish, false).await;
        assert!(margin > Decimal::ZERO);
        let floored = manager.calculate_margin(dec!(1), dec!(0.01), Trend::Bearish, false).await;
        assert_eq!(floored, dec!(10.0));
    }

    fn sample_position(symbol: Symbol, direction: Direction, margin: Decimal) -> Position {
        use crate::types::{ExitPlan, PositionStatus, TrailingState, TrendContext};
        Position {
            symbol,
            direction,
            status: PositionStatus::Open,
            quantity: dec!(1),
            entry_price: dec!(100),
            current_price: dec!(100),
            unrealized_pnl: Decimal::ZERO,
            notional_usd: dec!(100),
            margin_usd: margin,
            leverage: 10,
            liquidation_price: dec!(90),
            confidence: dec!(0.5),
            risk_usd: dec!(5),
            exit_plan: ExitPlan::default(),
            trailing_state: TrailingState::default(),
            loss_cycle_count: 0,
            entry_time: chrono::Utc::now(),
            trend_context: TrendContext { trend_at_entry: Trend::Bullish, cycle_number: 1 },
        }
    }
}
