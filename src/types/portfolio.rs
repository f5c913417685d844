use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use super::{Direction, Position, Symbol, Trend};

const BIAS_RING_SIZE: usize = 20;
const VALUE_HISTORY_CAP: usize = 100;

/// Per-direction rolling win/loss bookkeeping (spec.md §3 "Directional bias").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectionalBias {
    #[serde(default)]
    pnl_ring: VecDeque<Decimal>,
    pub net_pnl: Decimal,
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub consecutive_losses: u32,
}

impl DirectionalBias {
    pub fn record(&mut self, pnl: Decimal) {
        self.pnl_ring.push_back(pnl);
        if self.pnl_ring.len() > BIAS_RING_SIZE {
            self.pnl_ring.pop_front();
        }
        self.net_pnl += pnl;
        self.trades += 1;
        if pnl > Decimal::ZERO {
            self.wins += 1;
            self.consecutive_losses = 0;
        } else {
            self.losses += 1;
            self.consecutive_losses += 1;
        }
    }

    pub fn rolling_average(&self) -> Decimal {
        if self.pnl_ring.is_empty() {
            return Decimal::ZERO;
        }
        let sum: Decimal = self.pnl_ring.iter().sum();
        sum / Decimal::from(self.pnl_ring.len() as u32)
    }
}

/// Last classified trend for a coin, with flip/cooldown bookkeeping
/// (spec.md §4.3 `update_trend_state`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendState {
    pub trend: Trend,
    pub last_flip_cycle: u64,
    pub last_seen_cycle: u64,
}

impl Default for TrendState {
    fn default() -> Self {
        Self {
            trend: Trend::Unknown,
            last_flip_cycle: 0,
            last_seen_cycle: 0,
        }
    }
}

impl TrendState {
    pub fn recent_flip(&self, current_cycle: u64, cooldown: u64) -> bool {
        current_cycle.saturating_sub(self.last_flip_cycle) < cooldown
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub initial_balance: Decimal,
    pub current_balance: Decimal,
    pub total_value: Decimal,
    pub total_return_pct: Decimal,
    pub sharpe_ratio: Decimal,
    pub positions: HashMap<Symbol, Position>,
    pub trade_count: u64,
    #[serde(default)]
    pub portfolio_values_history: VecDeque<Decimal>,
    #[serde(default)]
    pub directional_bias: HashMap<Direction, DirectionalBias>,
    #[serde(default)]
    pub trend_states: HashMap<Symbol, TrendState>,
    pub last_updated: DateTime<Utc>,
}

impl Portfolio {
    pub fn new(initial_balance: Decimal) -> Self {
        let mut directional_bias = HashMap::new();
        directional_bias.insert(Direction::Long, DirectionalBias::default());
        directional_bias.insert(Direction::Short, DirectionalBias::default());

        Self {
            initial_balance,
            current_balance: initial_balance,
            total_value: initial_balance,
            total_return_pct: Decimal::ZERO,
            sharpe_ratio: Decimal::ZERO,
            positions: HashMap::new(),
            trade_count: 0,
            portfolio_values_history: VecDeque::from(vec![initial_balance]),
            directional_bias,
            trend_states: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_position(&self, symbol: &Symbol) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn total_margin(&self) -> Decimal {
        self.positions.values().map(|p| p.margin_usd).sum()
    }

    pub fn total_unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    /// `current_balance + Σ (margin_usd + unrealized_pnl)` — invariant 6.
    /// Does not touch `portfolio_values_history`; call `record_value_sample`
    /// separately where a new Sharpe-ratio sample is warranted.
    pub fn recompute_total_value(&mut self) {
        self.total_value = self.current_balance + self.total_margin() + self.total_unrealized_pnl();
        self.total_return_pct = if self.initial_balance.is_zero() {
            Decimal::ZERO
        } else {
            ((self.total_value - self.initial_balance) / self.initial_balance) * Decimal::from(100)
        };
        self.last_updated = Utc::now();
    }

    /// Appends the current `total_value` to `portfolio_values_history`
    /// (spec.md §4.3's one-sample-per-cycle Sharpe series) — called only
    /// from mark-to-market, mirroring `update_prices` being the original's
    /// only caller of its history append.
    pub fn record_value_sample(&mut self) {
        self.portfolio_values_history.push_back(self.total_value);
        if self.portfolio_values_history.len() > VALUE_HISTORY_CAP {
            self.portfolio_values_history.pop_front();
        }
    }

    pub fn positions_in_direction(&self, direction: Direction) -> usize {
        self.positions.values().filter(|p| p.direction == direction).count()
    }

    pub fn concentration_pct(&self, extra_margin: Decimal) -> Decimal {
        let base = self.current_balance + self.total_margin();
        if base.is_zero() {
            return Decimal::ZERO;
        }
        (extra_margin / base) * Decimal::from(100)
    }
}
