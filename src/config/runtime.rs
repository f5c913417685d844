use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::TradingMode;

/// Immutable engine configuration, loaded once at startup and threaded
/// through constructors (spec.md §9 "process-wide singletons"). Every
/// knob enumerated in spec.md §6 plus the original's own algorithm
/// parameters (market-regime multipliers, trailing tunables, etc.) lives
/// here rather than as a scattered constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub trading_mode: TradingMode,
    pub initial_balance: Decimal,
    pub coins: Vec<String>,
    pub risk: RiskSettings,
    pub decision: DecisionSettings,
    pub exit: ExitSettings,
    pub scheduler: SchedulerSettings,
    pub llm: LlmSettings,
    pub exchange: ExchangeSettings,
    pub store: StoreSettings,
    pub web: WebSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Simulation,
            initial_balance: dec!(200.0),
            coins: vec![
                "BTC".to_string(),
                "ETH".to_string(),
                "SOL".to_string(),
                "ADA".to_string(),
                "XRP".to_string(),
            ],
            risk: RiskSettings::default(),
            decision: DecisionSettings::default(),
            exit: ExitSettings::default(),
            scheduler: SchedulerSettings::default(),
            llm: LlmSettings::default(),
            exchange: ExchangeSettings::default(),
            store: StoreSettings::default(),
            web: WebSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.coins.is_empty() {
            errors.push("coins must not be empty".to_string());
        }
        if self.initial_balance <= Decimal::ZERO {
            errors.push("initial_balance must be positive".to_string());
        }
        if self.risk.max_positions == 0 {
            errors.push("max_positions must be > 0".to_string());
        }
        if self.risk.min_confidence <= Decimal::ZERO || self.risk.min_confidence > Decimal::ONE {
            errors.push("min_confidence must be in (0, 1]".to_string());
        }
        if self.risk.max_leverage < 1 {
            errors.push("max_leverage must be >= 1".to_string());
        }
        if self.exchange.default_leverage > self.risk.max_leverage {
            errors.push("default_leverage cannot exceed max_leverage".to_string());
        }
        if matches!(self.trading_mode, TradingMode::Live) {
            if self.exchange.api_key.is_none() || self.exchange.secret_key.is_none() {
                errors.push("exchange API credentials are required in live mode".to_string());
            }
            if self.exchange.recv_window_ms < 1000 {
                errors.push("recv_window_ms must be at least 1000".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSettings {
    pub max_positions: usize,
    pub max_leverage: u32,
    pub leverage_floor: u32,
    pub min_confidence: Decimal,
    pub min_position_margin_usd: Decimal,
    pub min_partial_profit_margin_remaining_usd: Decimal,
    pub cash_floor_pct: Decimal,
    pub same_direction_limit: usize,
    pub concentration_pct: Decimal,
    pub maintenance_margin_rate: Decimal,
    pub market_regime_multipliers: HashMap<String, Decimal>,
    pub confidence_margin_fraction: Decimal,
    pub partial_margin_multiplier: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        let mut market_regime_multipliers = HashMap::new();
        market_regime_multipliers.insert("BULLISH".to_string(), dec!(1.0));
        market_regime_multipliers.insert("NEUTRAL".to_string(), dec!(0.9));
        market_regime_multipliers.insert("BEARISH".to_string(), dec!(0.8));

        Self {
            max_positions: 5,
            max_leverage: 20,
            leverage_floor: 8,
            min_confidence: dec!(0.4),
            min_position_margin_usd: dec!(10.0),
            min_partial_profit_margin_remaining_usd: dec!(15.0),
            cash_floor_pct: dec!(10),
            same_direction_limit: 4,
            concentration_pct: dec!(25),
            maintenance_margin_rate: dec!(0.005),
            market_regime_multipliers,
            confidence_margin_fraction: dec!(0.40),
            partial_margin_multiplier: dec!(0.5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSettings {
    pub volume_penalty_ratio_floor: Decimal,
    pub volume_penalty_multiplier: Decimal,
    pub counter_trend_confidence_floor: Decimal,
    pub counter_trend_min_conditions: u8,
    pub counter_trend_rsi_extreme_long: Decimal,
    pub counter_trend_rsi_extreme_short: Decimal,
    pub counter_trend_ema_proximity_pct: Decimal,
    pub counter_trend_volume_ratio: Decimal,
    pub trend_following_min_volume_ratio: Decimal,
    pub trend_following_partial_margin_volume_ratio: Decimal,
    pub trend_following_confidence_boost: Decimal,
    pub ema_neutral_band_pct: Decimal,
    pub intraday_neutral_rsi_high: Decimal,
    pub intraday_neutral_rsi_low: Decimal,
    pub trend_flip_cooldown_cycles: u64,
    pub directional_bias_loss_streak_multiplier: Decimal,
    pub directional_bias_negative_avg_multiplier: Decimal,
    pub directional_bias_aligned_boost: Decimal,
    pub directional_bias_misaligned_multiplier: Decimal,
    pub directional_bias_neutral_multiplier: Decimal,
    pub directional_bias_loss_streak: u32,
    pub short_enhancement_multiplier: Decimal,
    pub short_enhancement_rsi_threshold: Decimal,
    pub short_enhancement_volume_ratio: Decimal,
    pub coin_stop_loss_multipliers: HashMap<String, Decimal>,
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            volume_penalty_ratio_floor: dec!(0.30),
            volume_penalty_multiplier: dec!(0.7),
            counter_trend_confidence_floor: dec!(0.75),
            counter_trend_min_conditions: 3,
            counter_trend_rsi_extreme_long: dec!(25),
            counter_trend_rsi_extreme_short: dec!(75),
            counter_trend_ema_proximity_pct: dec!(1.0),
            counter_trend_volume_ratio: dec!(1.5),
            trend_following_min_volume_ratio: dec!(0.5),
            trend_following_partial_margin_volume_ratio: dec!(0.8),
            trend_following_confidence_boost: dec!(0.05),
            ema_neutral_band_pct: dec!(0.0015),
            intraday_neutral_rsi_high: dec!(60.0),
            intraday_neutral_rsi_low: dec!(40.0),
            trend_flip_cooldown_cycles: 3,
            directional_bias_loss_streak_multiplier: dec!(0.9),
            directional_bias_negative_avg_multiplier: dec!(0.93),
            directional_bias_aligned_boost: dec!(1.05),
            directional_bias_misaligned_multiplier: dec!(0.9),
            directional_bias_neutral_multiplier: dec!(0.9),
            directional_bias_loss_streak: 3,
            short_enhancement_multiplier: dec!(1.15),
            short_enhancement_rsi_threshold: dec!(70),
            short_enhancement_volume_ratio: dec!(1.5),
            coin_stop_loss_multipliers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitSettings {
    pub stall_cycle_threshold: u32,
    pub loss_cut_tiers: Vec<(Decimal, Decimal)>, // (margin_ceiling, k)
    pub default_loss_cut_k: Decimal,
    pub trailing_min_improvement_pct: Decimal,
}

impl Default for ExitSettings {
    fn default() -> Self {
        Self {
            stall_cycle_threshold: 10,
            loss_cut_tiers: vec![
                (dec!(30), dec!(0.08)),
                (dec!(40), dec!(0.07)),
                (dec!(50), dec!(0.06)),
            ],
            default_loss_cut_k: dec!(0.05),
            trailing_min_improvement_pct: dec!(0.0005),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub cycle_interval_fast_secs: u64,
    pub cycle_interval_medium_secs: u64,
    pub cycle_interval_slow_secs: u64,
    pub atr_threshold_low: Decimal,
    pub atr_threshold_medium: Decimal,
    pub exit_monitor_interval_secs: u64,
    pub shutdown_join_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            cycle_interval_fast_secs: 120,
            cycle_interval_medium_secs: 180,
            cycle_interval_slow_secs: 240,
            atr_threshold_low: dec!(0.3),
            atr_threshold_medium: dec!(0.6),
            exit_monitor_interval_secs: 45,
            shutdown_join_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub request_timeout_secs: u64,
    pub max_retry_attempts: u32,
    pub fallback_lookback_cycles: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.deepseek.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "deepseek-chat".to_string(),
            request_timeout_secs: 120,
            max_retry_attempts: 3,
            fallback_lookback_cycles: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSettings {
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub testnet: bool,
    pub margin_type: String,
    pub default_leverage: u32,
    pub recv_window_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            secret_key: None,
            testnet: false,
            margin_type: "ISOLATED".to_string(),
            default_leverage: 10,
            recv_window_ms: 5000,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    pub data_dir: String,
    pub trade_history_cap: usize,
    pub cycle_history_cap: usize,
    pub performance_report_cap: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            trade_history_cap: 100,
            cycle_history_cap: 50,
            performance_report_cap: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSettings {
    pub bind_addr: String,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}
