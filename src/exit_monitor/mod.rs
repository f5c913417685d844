use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::EngineConfig;
use crate::types::{CloseReason, Direction, Position};

/// What the exit monitor decided for one position this tick. A single mark
/// can produce more than one action — a partial close and a trailing-stop
/// tightening are independent rules and both may fire together (spec.md §4.6
/// scenario S4). The caller applies them through
/// `portfolio::PortfolioLedger::apply_exit`/`Position::tighten_stop_loss`;
/// this module only decides, it never mutates.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitAction {
    CloseFull { reason: CloseReason },
    PartialClose { fraction: Decimal, reason: CloseReason },
    UpdateStop { new_stop: Decimal, tier: &'static str },
}

struct ProfitLevels {
    level1: Decimal,
    level2: Decimal,
    level3: Decimal,
    take1: Decimal,
    take2: Decimal,
    take3: Decimal,
}

/// Dynamic profit-taking bands keyed by notional size (spec.md §4.6.3),
/// grounded on `get_profit_levels_by_notional` in the original.
fn profit_levels_by_notional(notional_usd: Decimal) -> ProfitLevels {
    let (level1, level2, level3) = if notional_usd < dec!(150) {
        (dec!(0.007), dec!(0.009), dec!(0.011))
    } else if notional_usd < dec!(300) {
        (dec!(0.007), dec!(0.009), dec!(0.011))
    } else if notional_usd < dec!(400) {
        (dec!(0.006), dec!(0.008), dec!(0.010))
    } else if notional_usd < dec!(500) {
        (dec!(0.005), dec!(0.007), dec!(0.009))
    } else if notional_usd < dec!(600) {
        (dec!(0.004), dec!(0.006), dec!(0.008))
    } else {
        (dec!(0.003), dec!(0.005), dec!(0.007))
    };
    ProfitLevels {
        level1,
        level2,
        level3,
        take1: dec!(0.25),
        take2: dec!(0.50),
        take3: dec!(0.75),
    }
}

/// Evaluates one open position against stall timeout, margin-based loss
/// cut, tiered partial profit, trailing stop, and hard TP/SL — in that
/// order (spec.md §4.6). Stall and margin-based loss cut are terminal: no
/// further rule runs once one fires.
pub struct ExitMonitor {
    config: Arc<RwLock<EngineConfig>>,
}

impl ExitMonitor {
    pub fn new(config: Arc<RwLock<EngineConfig>>) -> Self {
        Self { config }
    }

    pub async fn evaluate(&self, position: &Position, current_balance: Decimal) -> Vec<ExitAction> {
        let config = self.config.read().await;
        let exit = &config.exit;

        if position.loss_cycle_count >= exit.stall_cycle_threshold && position.unrealized_pnl <= Decimal::ZERO {
            return vec![ExitAction::CloseFull { reason: CloseReason::StallTimeout }];
        }

        let k = exit
            .loss_cut_tiers
            .iter()
            .find(|(ceiling, _)| position.margin_usd < *ceiling)
            .map(|(_, k)| *k)
            .unwrap_or(exit.default_loss_cut_k);
        let loss_threshold = position.margin_usd * k;
        let unrealized_loss = (-position.unrealized_pnl).max(Decimal::ZERO);
        if loss_threshold > Decimal::ZERO && unrealized_loss >= loss_threshold {
            return vec![ExitAction::CloseFull { reason: CloseReason::MarginLossCut }];
        }

        let mut actions = Vec::new();
        let levels = profit_levels_by_notional(position.notional_usd);
        let gain = position.favorable_gain_fraction();

        let tiered = if gain >= levels.level3 {
            Some(self.tiered_profit_action(position, current_balance, levels.take3))
        } else if gain >= levels.level2 {
            Some(self.tiered_profit_action(position, current_balance, levels.take2))
        } else if gain >= levels.level1 {
            Some(self.tiered_profit_action(position, current_balance, levels.take1))
        } else {
            None
        };

        if let Some(action) = tiered {
            let is_full_close = matches!(action, ExitAction::CloseFull { .. });
            actions.push(action);
            if is_full_close {
                return actions;
            }
        }

        // Dynamic trailing stop: independent of the tiered profit check
        // above, only tighten once the move is large enough to matter
        // (exit.trailing_min_improvement_pct guards against churn).
        if gain >= levels.level2 {
            let candidate = trailing_price(position.entry_price, position.direction, levels.level1);
            if self.improves_enough(position, candidate, exit.trailing_min_improvement_pct) {
                actions.push(ExitAction::UpdateStop { new_stop: candidate, tier: "tight" });
            }
        } else if gain >= levels.level1 {
            let candidate = trailing_price(position.entry_price, position.direction, levels.level1 / Decimal::from(2));
            if self.improves_enough(position, candidate, exit.trailing_min_improvement_pct) {
                actions.push(ExitAction::UpdateStop { new_stop: candidate, tier: "normal" });
            }
        }

        if position.hit_stop_loss() {
            return vec![ExitAction::CloseFull { reason: CloseReason::StopLoss }];
        }
        if position.hit_take_profit() {
            return vec![ExitAction::CloseFull { reason: CloseReason::TakeProfit }];
        }

        actions
    }

    fn improves_enough(&self, position: &Position, candidate: Decimal, min_improvement_pct: Decimal) -> bool {
        match position.exit_plan.stop_loss {
            None => true,
            Some(current) => {
                let gap = (candidate - current).abs() / position.entry_price;
                let improves = match position.direction {
                    Direction::Long => candidate > current,
                    Direction::Short => candidate < current,
                };
                improves && gap >= min_improvement_pct
            }
        }
    }

    /// Grounded on `_adjust_partial_sale_for_max_limit`: force a full close
    /// once the position's margin is already at or below the maximum
    /// limit, otherwise shrink the proposed close fraction so the margin
    /// left behind never drops under it. The "minimum limit" sibling
    /// function in the original is defined but never called from this
    /// path — dropped here rather than reimplemented as dead weight.
    fn tiered_profit_action(&self, position: &Position, current_balance: Decimal, proposed_fraction: Decimal) -> ExitAction {
        let max_limit = self.max_limit_blocking(current_balance);
        if position.margin_usd <= max_limit {
            return ExitAction::CloseFull { reason: CloseReason::PartialProfit };
        }
        let remaining_after = position.margin_usd * (Decimal::ONE - proposed_fraction);
        let adjusted = if remaining_after >= max_limit {
            proposed_fraction
        } else {
            (position.margin_usd - max_limit) / position.margin_usd
        };
        ExitAction::PartialClose { fraction: adjusted, reason: CloseReason::PartialProfit }
    }

    fn max_limit_blocking(&self, current_balance: Decimal) -> Decimal {
        (current_balance * dec!(0.15)).max(dec!(15))
    }
}

fn trailing_price(entry_price: Decimal, direction: Direction, offset_pct: Decimal) -> Decimal {
    match direction {
        Direction::Long => entry_price * (Decimal::ONE + offset_pct),
        Direction::Short => entry_price * (Decimal::ONE - offset_pct),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExitPlan, PositionStatus, Symbol, TrailingState, Trend, TrendContext};
    use rust_decimal_macros::dec;

    fn config_handle() -> Arc<RwLock<EngineConfig>> {
        Arc::new(RwLock::new(EngineConfig::default()))
    }

    fn long_position(entry: Decimal, current: Decimal, margin: Decimal, loss_cycle_count: u32) -> Position {
        let quantity = dec!(100);
        let notional = quantity * current;
        Position {
            symbol: Symbol::new("X"),
            direction: Direction::Long,
            status: PositionStatus::Open,
            quantity,
            entry_price: entry,
            current_price: current,
            unrealized_pnl: (current - entry) * quantity,
            notional_usd: notional,
            margin_usd: margin,
            leverage: 10,
            liquidation_price: entry * dec!(0.9),
            confidence: dec!(0.6),
            risk_usd: dec!(5),
            exit_plan: ExitPlan { profit_target: Some(dec!(1.05)), stop_loss: Some(dec!(0.95)), invalidation_condition: None },
            trailing_state: TrailingState::default(),
            loss_cycle_count,
            entry_time: chrono::Utc::now(),
            trend_context: TrendContext { trend_at_entry: Trend::Bullish, cycle_number: 1 },
        }
    }

    #[tokio::test]
    async fn s5_stall_timeout_closes_after_ten_negative_cycles() {
        let monitor = ExitMonitor::new(config_handle());
        let position = long_position(dec!(1.000), dec!(0.999), dec!(20), 10);
        let actions = monitor.evaluate(&position, dec!(1000)).await;
        assert_eq!(actions, vec![ExitAction::CloseFull { reason: CloseReason::StallTimeout }]);
    }

    #[tokio::test]
    async fn margin_loss_cut_closes_when_threshold_breached() {
        let monitor = ExitMonitor::new(config_handle());
        let mut position = long_position(dec!(1.000), dec!(1.000), dec!(20), 0);
        position.quantity = dec!(2000);
        position.current_price = dec!(0.97);
        position.unrealized_pnl = (dec!(0.97) - dec!(1.000)) * position.quantity;
        let actions = monitor.evaluate(&position, dec!(1000)).await;
        assert_eq!(actions, vec![ExitAction::CloseFull { reason: CloseReason::MarginLossCut }]);
    }

    #[tokio::test]
    async fn s4_partial_profit_at_level1_then_trailing_and_partial_at_level2() {
        let monitor = ExitMonitor::new(config_handle());

        // Mark at 1.009: gain 0.9% lands in the level-2 band, but the
        // max-limit adjustment shrinks the 50% tier down to 25% since cash
        // is tight ($1000 cash -> $150 max-limit floor, $200 margin).
        let position = long_position(dec!(1.000), dec!(1.009), dec!(200), 0);
        let actions = monitor.evaluate(&position, dec!(1000)).await;
        assert!(actions.iter().any(|a| matches!(a, ExitAction::PartialClose { fraction, reason } if *fraction == dec!(0.25) && *reason == CloseReason::PartialProfit)));

        // Mark at 1.012: gain 1.2% is past level3 for this notional band,
        // triggering both a (max-limit-adjusted) partial close and a
        // tightened trailing stop in the same evaluation.
        let position = long_position(dec!(1.000), dec!(1.012), dec!(200), 0);
        let actions = monitor.evaluate(&position, dec!(1000)).await;
        assert!(actions.iter().any(|a| matches!(a, ExitAction::PartialClose { .. })));
        assert!(actions.iter().any(|a| matches!(a, ExitAction::UpdateStop { new_stop, .. } if *new_stop > dec!(1.000))));
    }

    #[tokio::test]
    async fn tiered_profit_force_closes_when_margin_at_or_below_max_limit() {
        let monitor = ExitMonitor::new(config_handle());
        let position = long_position(dec!(1.000), dec!(1.009), dec!(10), 0);
        let actions = monitor.evaluate(&position, dec!(50)).await;
        assert_eq!(actions, vec![ExitAction::CloseFull { reason: CloseReason::PartialProfit }]);
    }

    #[tokio::test]
    async fn trailing_stop_never_widens_past_an_existing_tighter_stop() {
        let monitor = ExitMonitor::new(config_handle());
        let mut position = long_position(dec!(1.000), dec!(1.012), dec!(200), 0);
        position.exit_plan.stop_loss = Some(dec!(1.010));
        let actions = monitor.evaluate(&position, dec!(1000)).await;
        for action in &actions {
            if let ExitAction::UpdateStop { new_stop, .. } = action {
                assert!(*new_stop > dec!(1.010));
            }
        }
    }

    #[tokio::test]
    async fn hard_stop_loss_closes_position() {
        let monitor = ExitMonitor::new(config_handle());
        let mut position = long_position(dec!(1.000), dec!(0.94), dec!(200), 0);
        position.exit_plan.stop_loss = Some(dec!(0.95));
        position.loss_cycle_count = 0;
        let actions = monitor.evaluate(&position, dec!(1000)).await;
        assert_eq!(actions, vec![ExitAction::CloseFull { reason: CloseReason::StopLoss }]);
    }
}
