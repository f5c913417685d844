use crate::error::EngineResult;
use crate::types::{Alert, BotControl, ClosedTrade, CycleRecord, ManualOverride, PerformanceReport, Portfolio};

use super::json_store::JsonStore;

const TRADE_HISTORY_CAP: usize = 100;
const CYCLE_HISTORY_CAP: usize = 50;
const PERFORMANCE_REPORT_CAP: usize = 50;

const PORTFOLIO_STATE: &str = "portfolio_state.json";
const TRADE_HISTORY: &str = "trade_history.json";
const CYCLE_HISTORY: &str = "cycle_history.json";
const PERFORMANCE_REPORT: &str = "performance_report.json";
const MANUAL_OVERRIDE: &str = "manual_override.json";
const BOT_CONTROL: &str = "bot_control.json";
const ALERTS: &str = "alerts.json";

/// Typed view over the well-known document set in spec.md §6, backed by a
/// `JsonStore`. Capped arrays (trade/cycle/performance history) are
/// read-modify-written under the store's own locking, so the cap is
/// enforced at the document-write boundary rather than scattered across
/// callers.
#[derive(Debug, Clone)]
pub struct StateStore {
    inner: JsonStore,
}

impl StateStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { inner: JsonStore::new(root) }
    }

    pub fn load_portfolio(&self, initial_balance: rust_decimal::Decimal) -> EngineResult<Portfolio> {
        self.inner.read(PORTFOLIO_STATE, Portfolio::new(initial_balance))
    }

    pub fn save_portfolio(&self, portfolio: &Portfolio) -> EngineResult<()> {
        self.inner.write(PORTFOLIO_STATE, portfolio)
    }

    pub fn list_trades(&self) -> EngineResult<Vec<ClosedTrade>> {
        self.inner.read(TRADE_HISTORY, Vec::new())
    }

    pub fn append_trade(&self, trade: ClosedTrade) -> EngineResult<()> {
        let mut trades: Vec<ClosedTrade> = self.list_trades()?;
        trades.push(trade);
        if trades.len() > TRADE_HISTORY_CAP {
            let overflow = trades.len() - TRADE_HISTORY_CAP;
            trades.drain(0..overflow);
        }
        self.inner.write(TRADE_HISTORY, &trades)
    }

    pub fn list_cycles(&self) -> EngineResult<Vec<CycleRecord>> {
        self.inner.read(CYCLE_HISTORY, Vec::new())
    }

    pub fn append_cycle(&self, record: CycleRecord) -> EngineResult<()> {
        let mut cycles: Vec<CycleRecord> = self.list_cycles()?;
        cycles.push(record);
        if cycles.len() > CYCLE_HISTORY_CAP {
            let overflow = cycles.len() - CYCLE_HISTORY_CAP;
            cycles.drain(0..overflow);
        }
        self.inner.write(CYCLE_HISTORY, &cycles)
    }

    pub fn list_performance_reports(&self) -> EngineResult<Vec<PerformanceReport>> {
        self.inner.read(PERFORMANCE_REPORT, Vec::new())
    }

    pub fn append_performance_report(&self, report: PerformanceReport) -> EngineResult<()> {
        let mut reports: Vec<PerformanceReport> = self.list_performance_reports()?;
        reports.push(report);
        if reports.len() > PERFORMANCE_REPORT_CAP {
            let overflow = reports.len() - PERFORMANCE_REPORT_CAP;
            reports.drain(0..overflow);
        }
        self.inner.write(PERFORMANCE_REPORT, &reports)
    }

    /// Reads and deletes `manual_override.json` — consumed at most once per
    /// cycle by the scheduler (spec.md §3 "Manual override").
    pub fn take_manual_override(&self) -> EngineResult<Option<ManualOverride>> {
        self.inner.take(MANUAL_OVERRIDE)
    }

    /// Writes `manual_override.json` (spec.md §6 `POST /api/force-close`).
    pub fn save_manual_override(&self, override_doc: &ManualOverride) -> EngineResult<()> {
        self.inner.write(MANUAL_OVERRIDE, override_doc)
    }

    pub fn load_bot_control(&self) -> EngineResult<BotControl> {
        self.inner.read(BOT_CONTROL, BotControl::default())
    }

    pub fn save_bot_control(&self, control: &BotControl) -> EngineResult<()> {
        self.inner.write(BOT_CONTROL, control)
    }

    pub fn append_alert(&self, alert: Alert) -> EngineResult<()> {
        self.inner.append_line(ALERTS, &alert)
    }

    pub fn list_alerts(&self) -> EngineResult<Vec<Alert>> {
        self.inner.read_lines(ALERTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertKind, BotStatus};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[test]
    fn portfolio_round_trips_with_default_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let loaded = store.load_portfolio(dec!(2000)).unwrap();
        assert_eq!(loaded.initial_balance, dec!(2000));

        store.save_portfolio(&loaded).unwrap();
        let reloaded = store.load_portfolio(dec!(0)).unwrap();
        assert_eq!(reloaded.initial_balance, dec!(2000));
    }

    #[test]
    fn trade_history_caps_at_100() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        for i in 0..110 {
            let trade = ClosedTrade {
                symbol: crate::types::Symbol::new("BTC"),
                direction: crate::types::Direction::Long,
                entry_price: dec!(1),
                exit_price: dec!(1),
                quantity: dec!(1),
                notional_usd: dec!(1),
                realized_pnl: Decimal::from(i),
                leverage: 10,
                entry_time: chrono::Utc::now(),
                exit_time: chrono::Utc::now(),
                close_reason: crate::types::CloseReason::AiClose,
            };
            store.append_trade(trade).unwrap();
        }

        let trades = store.list_trades().unwrap();
        assert_eq!(trades.len(), TRADE_HISTORY_CAP);
        assert_eq!(trades.first().unwrap().realized_pnl, Decimal::from(10));
    }

    #[test]
    fn manual_override_is_consumed_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let override_doc = ManualOverride {
            timestamp: chrono::Utc::now(),
            decisions: std::collections::HashMap::new(),
        };
        store.inner.write("manual_override.json", &override_doc).unwrap();

        assert!(store.take_manual_override().unwrap().is_some());
        assert!(store.take_manual_override().unwrap().is_none());
    }

    #[test]
    fn bot_control_defaults_to_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let control = store.load_bot_control().unwrap();
        assert_eq!(control.status, BotStatus::Running);
    }

    #[test]
    fn alerts_accumulate_as_newline_delimited_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .append_alert(Alert::new(AlertKind::EmergencyStop { reason: "drawdown".into() }))
            .unwrap();
        store
            .append_alert(Alert::new(AlertKind::PositionOpened {
                coin: crate::types::Symbol::new("ETH"),
                direction: crate::types::Direction::Short,
                entry_price: dec!(100),
                margin_usd: dec!(10),
            }))
            .unwrap();

        let alerts = store.list_alerts().unwrap();
        assert_eq!(alerts.len(), 2);
    }
}
