use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::exit_monitor::ExitAction;
use crate::llm::{CoinSnapshot, DecisionMap, EngineSnapshot};
use crate::types::{
    Alert, AlertKind, CloseReason, CycleRecord, Direction, Position, Signal, Symbol, TimeFrame,
};

use super::CycleScheduler;

const HTF: TimeFrame = TimeFrame::H4;
const LTF: TimeFrame = TimeFrame::M3;
const FALLBACK_LOOKBACK: usize = 5;

impl CycleScheduler {
    /// Runs one full decision cycle (spec.md §2/§4.7/§5's ordering
    /// guarantee: prices → mark-to-market → auto-exits → AI →
    /// close_position signals → entries → persist) and returns the sleep
    /// interval to use before the next one.
    pub(crate) async fn run_one_cycle(&self, cycle_number: u64) -> EngineResult<Duration> {
        let coins = self.configured_coins().await;

        self.apply_manual_override(&coins).await;

        let positions_by_coin: HashMap<Symbol, Position> = self.ledger.read().await.positions.clone();
        let prices = self.market_data.prices(&coins, &positions_by_coin).await;
        self.ledger.mark_to_market(&prices, true).await;

        self.run_auto_exits(cycle_number).await;

        let mut snapshots = Vec::with_capacity(coins.len());
        let mut atr_values = Vec::with_capacity(coins.len());
        for coin in &coins {
            match self.build_coin_snapshot(coin, cycle_number).await {
                Ok((snapshot, atr_ltf)) => {
                    if let Some(atr) = atr_ltf {
                        atr_values.push(atr);
                    }
                    snapshots.push(snapshot);
                }
                Err(err) => warn!(coin = %coin, error = %err, "quarantining coin for this cycle: indicator fetch failed"),
            }
        }

        let portfolio_snapshot = self.ledger.snapshot().await;
        let engine_snapshot = EngineSnapshot {
            cycle_number,
            invocation_count: cycle_number,
            timestamp: Utc::now(),
            portfolio: portfolio_snapshot,
            coins: snapshots,
        };

        let recent_successful = self.recent_successful_decisions();
        let decisions = self.llm.fetch_decisions(&engine_snapshot, &recent_successful).await;

        self.process_decisions(&decisions, cycle_number).await;

        let record = CycleRecord {
            cycle_number,
            timestamp: Utc::now(),
            prompt_summary: format!("{} coins evaluated", engine_snapshot.coins.len()),
            chain_of_thought: None,
            decisions: decisions.clone(),
            error: None,
        };
        if let Err(err) = self.store.append_cycle(record) {
            warn!(error = %err, "failed to append cycle record");
        }
        if let Err(err) = self.store.save_portfolio(&self.ledger.snapshot().await) {
            warn!(error = %err, "failed to persist portfolio state");
        }

        Ok(self.adaptive_sleep_interval(&atr_values).await)
    }

    async fn apply_manual_override(&self, coins: &[Symbol]) {
        let Ok(Some(override_doc)) = self.store.take_manual_override() else { return };
        info!(count = override_doc.decisions.len(), "applying manual override, bypassing validation");

        let positions_by_coin: HashMap<Symbol, Position> = self.ledger.read().await.positions.clone();
        let prices = self.market_data.prices(coins, &positions_by_coin).await;

        for (coin, decision) in override_doc.decisions {
            if decision.signal == Signal::ClosePosition {
                self.close_position(&coin, prices.get(&coin).copied().unwrap_or(Decimal::ZERO), CloseReason::ManualOverride).await;
            }
        }
    }

    async fn run_auto_exits(&self, cycle_number: u64) {
        let positions: Vec<Position> = self.ledger.read().await.positions.values().cloned().collect();
        let balance = self.ledger.read().await.current_balance;

        for position in positions {
            let actions = self.exit_monitor.evaluate(&position, balance).await;
            for action in actions {
                self.apply_exit_action(&position.symbol, action, cycle_number).await;
            }
        }
    }

    async fn apply_exit_action(&self, coin: &Symbol, action: ExitAction, _cycle_number: u64) {
        match action {
            ExitAction::CloseFull { reason } => {
                let price = self.ledger.read().await.positions.get(coin).map(|p| p.current_price).unwrap_or(Decimal::ZERO);
                self.close_position(coin, price, reason).await;
            }
            ExitAction::PartialClose { fraction, reason } => {
                let price = self.ledger.read().await.positions.get(coin).map(|p| p.current_price).unwrap_or(Decimal::ZERO);
                match self.ledger.apply_exit(coin, price, fraction, reason).await {
                    Ok(Some(trade)) => {
                        self.mirror_exchange_reduce(coin, trade.direction, trade.quantity, trade.leverage, trade.exit_price).await;
                        let _ = self.store.append_trade(trade.clone());
                        self.record_alert(AlertKind::PartialProfitTaken { coin: coin.clone(), fraction, realized_pnl: trade.realized_pnl }).await;
                    }
                    Ok(None) => {}
                    Err(err) => warn!(coin = %coin, error = %err, "partial close failed"),
                }
            }
            ExitAction::UpdateStop { new_stop, tier } => {
                let handle = self.ledger.handle();
                let mut portfolio = handle.write().await;
                if let Some(position) = portfolio.positions.get_mut(coin) {
                    if position.tighten_stop_loss(new_stop, tier) {
                        drop(portfolio);
                        self.record_alert(AlertKind::TrailingStopTightened { coin: coin.clone(), new_stop, tier }).await;
                    }
                }
            }
        }
    }

    async fn close_position(&self, coin: &Symbol, price: Decimal, reason: CloseReason) {
        if !self.ledger.read().await.has_position(coin) {
            return;
        }
        match self.ledger.apply_exit(coin, price, Decimal::ONE, reason).await {
            Ok(Some(trade)) => {
                let _ = self.store.append_trade(trade.clone());
                self.record_alert(AlertKind::PositionClosed { coin: coin.clone(), reason, realized_pnl: trade.realized_pnl }).await;
                if matches!(self.config.read().await.trading_mode, crate::types::TradingMode::Live) {
                    if let Err(err) = self.exchange.close_position(coin).await {
                        warn!(coin = %coin, error = %err, "exchange close_position failed");
                    }
                    let _ = self.exchange.cancel_all_orders_for_symbol(coin).await;
                }
            }
            Ok(None) => {}
            Err(err) => warn!(coin = %coin, error = %err, "position close failed"),
        }
    }

    /// Mirrors a partial close on the exchange using the exact realized
    /// quantity the ledger already computed, rather than re-deriving it from
    /// the fraction against the position's (already-reduced) remaining size.
    async fn mirror_exchange_reduce(&self, coin: &Symbol, direction: Direction, quantity: Decimal, leverage: u32, price: Decimal) {
        if !matches!(self.config.read().await.trading_mode, crate::types::TradingMode::Live) {
            return;
        }
        if let Err(err) = self
            .exchange
            .place_market_order(coin, direction.opposite(), quantity, leverage, price, true)
            .await
        {
            warn!(coin = %coin, error = %err, "exchange partial-close mirror failed");
        }
    }

    async fn build_coin_snapshot(&self, coin: &Symbol, cycle_number: u64) -> EngineResult<(CoinSnapshot, Option<Decimal>)> {
        let htf = self.market_data.indicators(coin, HTF).await?;
        let ltf = self.market_data.indicators(coin, LTF).await?;

        let settings = self.config.read().await.decision.clone();
        self.ledger.update_trend_state(coin, cycle_number, &htf, Some(&ltf), &settings).await;

        let (trend, recent_flip) = {
            let portfolio = self.ledger.read().await;
            let state = portfolio.trend_states.get(coin).cloned().unwrap_or_default();
            (state.trend, state.recent_flip(cycle_number, settings.trend_flip_cooldown_cycles))
        };

        let atr = ltf.atr14.value;
        Ok((CoinSnapshot { symbol: coin.clone(), htf, ltf, trend, recent_flip }, atr))
    }

    /// AI override priority (spec.md §4.7): close_position signals execute
    /// first so the freed margin/position slots are visible to the entry
    /// pass that follows; hold signals are no-ops either way.
    async fn process_decisions(&self, decisions: &DecisionMap, cycle_number: u64) {
        let closes: Vec<&Symbol> = decisions.iter().filter(|(_, d)| d.signal == Signal::ClosePosition).map(|(c, _)| c).collect();
        for coin in closes {
            let price = self.ledger.read().await.positions.get(coin).map(|p| p.current_price).unwrap_or(Decimal::ZERO);
            self.close_position(coin, price, CloseReason::AiClose).await;
        }

        for (coin, decision) in decisions {
            if !decision.signal.is_entry() {
                continue;
            }
            if self.ledger.read().await.has_position(coin) {
                continue;
            }
            self.try_open_entry(coin, decision, cycle_number).await;
        }
    }

    async fn try_open_entry(&self, coin: &Symbol, decision: &crate::types::AiDecision, cycle_number: u64) {
        let (htf, ltf) = match (self.market_data.indicators(coin, HTF).await, self.market_data.indicators(coin, LTF).await) {
            (Ok(htf), Ok(ltf)) => (htf, ltf),
            _ => {
                warn!(coin = %coin, "skipping entry: indicators unavailable");
                return;
            }
        };

        let (htf_trend, recent_flip) = {
            let portfolio = self.ledger.read().await;
            let state = portfolio.trend_states.get(coin).cloned().unwrap_or_default();
            let cooldown = self.config.read().await.decision.trend_flip_cooldown_cycles;
            (state.trend, state.recent_flip(cycle_number, cooldown))
        };

        let bias = {
            let portfolio = self.ledger.read().await;
            let direction = decision.signal.direction().unwrap_or(Direction::Long);
            portfolio.directional_bias.get(&direction).cloned().unwrap_or_default()
        };

        let validated = match self
            .validator
            .validate_entry(coin, decision.signal, decision, &htf, &ltf, htf_trend, recent_flip, &bias)
            .await
        {
            Ok(v) => v,
            Err(err) => {
                self.record_alert(AlertKind::RiskRejected { coin: coin.clone(), reason: err.to_string() }).await;
                return;
            }
        };

        let (available_cash, maintenance_margin_rate) = {
            let portfolio = self.ledger.read().await;
            (portfolio.current_balance, self.config.read().await.risk.maintenance_margin_rate)
        };
        let margin_usd = self
            .risk
            .calculate_margin(available_cash, validated.confidence, htf_trend, validated.partial_margin)
            .await
            * validated.sizing_multiplier;

        let portfolio_snapshot = self.ledger.snapshot().await;
        if let Err(err) = self
            .risk
            .gate_entry(&portfolio_snapshot, coin, validated.direction, margin_usd, cycle_number, htf_trend)
            .await
        {
            self.record_alert(AlertKind::RiskRejected { coin: coin.clone(), reason: err.to_string() }).await;
            return;
        }

        let entry_price = htf.current_price.max(ltf.current_price);
        if entry_price.is_zero() {
            warn!(coin = %coin, "skipping entry: no usable entry price");
            return;
        }
        let quantity = margin_usd * Decimal::from(validated.leverage) / entry_price;

        let trend_context = crate::types::TrendContext { trend_at_entry: htf_trend, cycle_number };
        let position = crate::portfolio::PortfolioLedger::build_position(
            coin.clone(),
            validated.direction,
            quantity,
            entry_price,
            validated.leverage,
            margin_usd,
            decision,
            maintenance_margin_rate,
            trend_context,
        );

        if let Err(err) = self.ledger.apply_entry(position).await {
            self.record_alert(AlertKind::RiskRejected { coin: coin.clone(), reason: err.to_string() }).await;
            return;
        }

        self.record_alert(AlertKind::PositionOpened { coin: coin.clone(), direction: validated.direction, entry_price, margin_usd }).await;

        if matches!(self.config.read().await.trading_mode, crate::types::TradingMode::Live) {
            match self.exchange.place_market_order(coin, validated.direction, quantity, validated.leverage, entry_price, false).await {
                Ok(_) => {
                    if let Some(stop_loss) = validated.stop_loss {
                        let _ = self.exchange.place_stop_loss_order(coin, validated.direction, quantity, stop_loss).await;
                    }
                    if let Some(profit_target) = decision.profit_target {
                        let _ = self.exchange.place_take_profit_order(coin, validated.direction, quantity, profit_target).await;
                    }
                }
                Err(err) => warn!(coin = %coin, error = %err, "exchange order placement failed after local entry applied"),
            }
        }
    }

    /// Background exit-monitor tick (spec.md §4.7 "Exit-monitor loop"):
    /// fetch prices, mark-to-market without incrementing loss counters,
    /// then run the same exit evaluation the decision loop uses.
    pub(crate) async fn run_exit_pass(&self) -> EngineResult<()> {
        let coins = self.configured_coins().await;
        let positions_by_coin: HashMap<Symbol, Position> = self.ledger.read().await.positions.clone();
        let prices = self.market_data.prices(&coins, &positions_by_coin).await;
        self.ledger.mark_to_market(&prices, false).await;
        self.run_auto_exits(self.flags().cycle_number()).await;
        Ok(())
    }

    fn recent_successful_decisions(&self) -> Vec<DecisionMap> {
        self.store
            .list_cycles()
            .unwrap_or_default()
            .into_iter()
            .rev()
            .take(FALLBACK_LOOKBACK)
            .filter(|c| c.error.is_none())
            .map(|c| c.decisions)
            .rev()
            .collect()
    }

    async fn record_alert(&self, kind: AlertKind) {
        if let Err(err) = self.store.append_alert(Alert::new(kind)) {
            warn!(error = %err, "failed to append alert");
        }
    }
}
