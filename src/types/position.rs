use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{CloseReason, Direction, Symbol};

/// A profit-target / stop-loss pair the AI (or a default) attached to an
/// entry. Either bound may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitPlan {
    pub profit_target: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub invalidation_condition: Option<String>,
}

/// Metadata about the last trailing-stop tightening, kept for the admin
/// surface and for tests asserting monotonicity (invariant 7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrailingState {
    pub last_stop: Option<Decimal>,
    pub last_updated: Option<DateTime<Utc>>,
    pub tier: Option<&'static str>,
}

/// Trend classification captured at entry time, carried on the position for
/// later counter-trend bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendContext {
    pub trend_at_entry: super::Trend,
    pub cycle_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub direction: Direction,
    pub status: PositionStatus,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub notional_usd: Decimal,
    pub margin_usd: Decimal,
    pub leverage: u32,
    pub liquidation_price: Decimal,
    pub confidence: Decimal,
    pub risk_usd: Decimal,
    pub exit_plan: ExitPlan,
    pub trailing_state: TrailingState,
    pub loss_cycle_count: u32,
    pub entry_time: DateTime<Utc>,
    pub trend_context: TrendContext,
}

impl Position {
    /// `notional_usd / leverage` — the amount of cash this position has
    /// locked up (spec.md §3 "Attributes").
    pub fn recompute_margin_from_notional(&mut self) {
        if self.leverage > 0 {
            self.margin_usd = self.notional_usd / Decimal::from(self.leverage);
        }
    }

    pub fn mark_to_market(&mut self, price: Decimal) {
        self.current_price = price;
        self.notional_usd = self.quantity * price;
        self.unrealized_pnl = match self.direction {
            Direction::Long => (price - self.entry_price) * self.quantity,
            Direction::Short => (self.entry_price - price) * self.quantity,
        };
    }

    pub fn pnl_pct_of_margin(&self) -> Decimal {
        if self.margin_usd.is_zero() {
            return Decimal::ZERO;
        }
        (self.unrealized_pnl / self.margin_usd) * Decimal::from(100)
    }

    /// Notional-price gain as a fraction (not percent) in the position's
    /// favorable direction — what the exit monitor's tier tables key off.
    pub fn favorable_gain_fraction(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        match self.direction {
            Direction::Long => (self.current_price - self.entry_price) / self.entry_price,
            Direction::Short => (self.entry_price - self.current_price) / self.entry_price,
        }
    }

    pub fn hit_stop_loss(&self) -> bool {
        match (self.exit_plan.stop_loss, self.direction) {
            (Some(sl), Direction::Long) => self.current_price <= sl,
            (Some(sl), Direction::Short) => self.current_price >= sl,
            (None, _) => false,
        }
    }

    pub fn hit_take_profit(&self) -> bool {
        match (self.exit_plan.profit_target, self.direction) {
            (Some(tp), Direction::Long) => self.current_price >= tp,
            (Some(tp), Direction::Short) => self.current_price <= tp,
            (None, _) => false,
        }
    }

    /// Raise (never lower) the stop-loss to `candidate`, respecting
    /// direction. Returns true if the stop moved.
    pub fn tighten_stop_loss(&mut self, candidate: Decimal, tier: &'static str) -> bool {
        let improves = match self.exit_plan.stop_loss {
            None => true,
            Some(current) => match self.direction {
                Direction::Long => candidate > current,
                Direction::Short => candidate < current,
            },
        };
        if improves {
            self.exit_plan.stop_loss = Some(candidate);
            self.trailing_state.last_stop = Some(candidate);
            self.trailing_state.last_updated = Some(Utc::now());
            self.trailing_state.tier = Some(tier);
        }
        improves
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub notional_usd: Decimal,
    pub realized_pnl: Decimal,
    pub leverage: u32,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub close_reason: CloseReason,
}
