pub mod cycle;

pub use cycle::*;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::decision::DecisionValidator;
use crate::exchange::ExchangeAdapter;
use crate::exit_monitor::ExitMonitor;
use crate::llm::LlmAdapter;
use crate::market_data::MarketDataProvider;
use crate::portfolio::PortfolioLedger;
use crate::risk::RiskManager;
use crate::store::StateStore;
use crate::types::{BotStatus, Symbol};

/// Cross-task coordination flags from spec.md §5: `cycle_active` tells the
/// exit monitor to stand down while the decision loop mutates the ledger,
/// `enhanced_exit_enabled` is cleared on entry to a cycle and restored on
/// exit. Grounded on the atomic-bool idiom in `engine::controller::BotController`,
/// generalized from a single running/paused pair to the two independent
/// flags the spec names.
#[derive(Default)]
pub struct SchedulerFlags {
    cycle_active: AtomicBool,
    enhanced_exit_enabled: AtomicBool,
    cycle_number: AtomicU64,
}

impl SchedulerFlags {
    pub fn cycle_active(&self) -> bool {
        self.cycle_active.load(Ordering::Acquire)
    }

    pub fn enhanced_exit_enabled(&self) -> bool {
        self.enhanced_exit_enabled.load(Ordering::Acquire)
    }

    pub fn cycle_number(&self) -> u64 {
        self.cycle_number.load(Ordering::Acquire)
    }
}

/// Drives the decision loop and the exit-monitor loop described in
/// spec.md §4.7, wired from the components built in the other modules.
/// This is the only place that holds references to all of them at once.
pub struct CycleScheduler {
    pub config: Arc<RwLock<EngineConfig>>,
    pub ledger: PortfolioLedger,
    pub market_data: Arc<MarketDataProvider>,
    pub risk: Arc<RiskManager>,
    pub validator: Arc<DecisionValidator>,
    pub exit_monitor: Arc<ExitMonitor>,
    pub llm: Arc<LlmAdapter>,
    pub exchange: Arc<dyn ExchangeAdapter>,
    pub store: Arc<StateStore>,
    flags: Arc<SchedulerFlags>,
}

impl CycleScheduler {
    pub fn new(
        config: Arc<RwLock<EngineConfig>>,
        ledger: PortfolioLedger,
        market_data: Arc<MarketDataProvider>,
        risk: Arc<RiskManager>,
        validator: Arc<DecisionValidator>,
        exit_monitor: Arc<ExitMonitor>,
        llm: Arc<LlmAdapter>,
        exchange: Arc<dyn ExchangeAdapter>,
        store: Arc<StateStore>,
    ) -> Self {
        let flags = Arc::new(SchedulerFlags::default());
        let starting_cycle = store.list_cycles().ok().and_then(|cycles| cycles.last().map(|c| c.cycle_number)).unwrap_or(0);
        flags.cycle_number.store(starting_cycle, Ordering::Release);
        flags.enhanced_exit_enabled.store(true, Ordering::Release);
        Self { config, ledger, market_data, risk, validator, exit_monitor, llm, exchange, store, flags }
    }

    pub fn flags(&self) -> Arc<SchedulerFlags> {
        Arc::clone(&self.flags)
    }

    fn bot_control_status(&self) -> BotStatus {
        self.store.load_bot_control().map(|c| c.status).unwrap_or(BotStatus::Running)
    }

    /// Foreground decision loop (spec.md §4.7 "Decision loop"). Runs until
    /// the persisted bot-control document reports `stopped`.
    pub async fn run_decision_loop(self: Arc<Self>) {
        loop {
            match self.bot_control_status() {
                BotStatus::Stopped => {
                    info!("bot-control status is stopped; decision loop exiting");
                    return;
                }
                BotStatus::Paused => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                BotStatus::Running | BotStatus::Unknown => {}
            }

            self.flags.cycle_active.store(true, Ordering::Release);
            self.flags.enhanced_exit_enabled.store(false, Ordering::Release);
            let cycle_number = self.flags.cycle_number.fetch_add(1, Ordering::AcqRel) + 1;

            let sleep_for = match self.run_one_cycle(cycle_number).await {
                Ok(interval) => interval,
                Err(err) => {
                    error!(cycle_number, error = %err, "decision cycle failed; recording error and continuing");
                    let settings = self.config.read().await.scheduler.cycle_interval_medium_secs;
                    Duration::from_secs(settings)
                }
            };

            self.flags.enhanced_exit_enabled.store(true, Ordering::Release);
            self.flags.cycle_active.store(false, Ordering::Release);

            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Background exit-monitor loop (spec.md §4.7 "Exit-monitor loop"):
    /// nominally a fixed 45 s period, but polls in ≤1 s steps so it can
    /// stand down promptly whenever the decision loop is active.
    pub async fn run_exit_monitor_loop(self: Arc<Self>) {
        let mut last_run = Instant::now() - Duration::from_secs(3600);

        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;

            if matches!(self.bot_control_status(), BotStatus::Stopped) {
                info!("bot-control status is stopped; exit monitor loop exiting");
                return;
            }
            if self.flags.cycle_active() || !self.flags.enhanced_exit_enabled() {
                continue;
            }

            let period = self.config.read().await.scheduler.exit_monitor_interval_secs;
            if last_run.elapsed() < Duration::from_secs(period) {
                continue;
            }
            last_run = Instant::now();

            if let Err(err) = self.run_exit_pass().await {
                warn!(error = %err, "exit-monitor pass failed; continuing");
            }
        }
    }

    /// Chooses the decision-loop sleep interval from the mean 3-minute
    /// ATR14 across coins (spec.md §4.7's volatility-adaptive rule).
    pub(crate) async fn adaptive_sleep_interval(&self, atr_values: &[Decimal]) -> Duration {
        let settings = self.config.read().await.scheduler.clone();
        if atr_values.is_empty() {
            return Duration::from_secs(settings.cycle_interval_slow_secs);
        }
        let mean: Decimal = atr_values.iter().sum::<Decimal>() / Decimal::from(atr_values.len() as u32);
        let secs = if mean < settings.atr_threshold_low {
            settings.cycle_interval_slow_secs
        } else if mean < settings.atr_threshold_medium {
            settings.cycle_interval_medium_secs
        } else {
            settings.cycle_interval_fast_secs
        };
        Duration::from_secs(secs)
    }

    pub(crate) async fn configured_coins(&self) -> Vec<Symbol> {
        self.config.read().await.coins.iter().map(Symbol::new).collect()
    }
}

