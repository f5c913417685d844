use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{AiDecision, Direction, DirectionalBias, IndicatorBundle, Signal, Symbol, Trend};

/// Output of the confidence pipeline (spec.md §4.5E), consumed by the risk
/// manager and the portfolio ledger when building the position.
#[derive(Debug, Clone)]
pub struct ValidatedEntry {
    pub direction: Direction,
    pub confidence: Decimal,
    pub sizing_multiplier: Decimal,
    pub partial_margin: bool,
    pub leverage: u32,
    pub stop_loss: Option<Decimal>,
}

/// Classifies entry signals as trend-following or counter-trend and runs the
/// confidence pipeline. Grounded on `_is_counter_trend_trade`,
/// `validate_counter_trade`, `apply_directional_bias`, and the
/// trend-following branch of `execute_decision` in the original.
pub struct DecisionValidator {
    config: Arc<RwLock<EngineConfig>>,
}

impl DecisionValidator {
    pub fn new(config: Arc<RwLock<EngineConfig>>) -> Self {
        Self { config }
    }

    pub fn is_counter_trend(htf_trend: Trend, direction: Direction) -> bool {
        htf_trend.opposes(direction)
    }

    /// Runs the full confidence pipeline for one AI entry signal. `htf` is
    /// the 4-hour indicator bundle, `ltf` the 3-minute bundle.
    pub async fn validate_entry(
        &self,
        coin: &Symbol,
        signal: Signal,
        ai: &AiDecision,
        htf: &IndicatorBundle,
        ltf: &IndicatorBundle,
        htf_trend: Trend,
        recent_flip: bool,
        bias: &DirectionalBias,
    ) -> EngineResult<ValidatedEntry> {
        let direction = signal
            .direction()
            .ok_or_else(|| EngineError::invalid_data(coin.as_str(), "validate_entry called on a non-entry signal"))?;

        let config = self.config.read().await;
        let settings = &config.decision;
        let mut confidence = ai.confidence.unwrap_or(dec!(0.5));

        // 1. Volume-ratio penalty.
        let volume_ratio = ltf.volume_ratio();
        if volume_ratio <= settings.volume_penalty_ratio_floor {
            confidence *= settings.volume_penalty_multiplier;
            if confidence < config.risk.min_confidence {
                return Err(EngineError::risk_rejected(coin.as_str(), format!("confidence {confidence} below minimum after low-volume penalty")));
            }
        }

        // 2. Directional-bias adjustment. Applies unconditionally, even with
        // zero realized trades for this direction — a fresh `DirectionalBias`
        // has `rolling_avg == 0`, which falls through to the misaligned/
        // neutral branches below exactly as the original does on a cold bias.
        let rolling_avg = bias.rolling_average();
        if bias.consecutive_losses >= settings.directional_bias_loss_streak {
            confidence *= settings.directional_bias_loss_streak_multiplier;
        }
        match htf_trend {
            Trend::Neutral | Trend::Unknown => confidence *= settings.directional_bias_neutral_multiplier,
            Trend::Bullish | Trend::Bearish => {
                let aligned = htf_trend.agrees_with(direction);
                if aligned && rolling_avg > Decimal::ZERO {
                    confidence = (confidence * settings.directional_bias_aligned_boost).min(Decimal::ONE);
                } else if !aligned {
                    confidence *= settings.directional_bias_misaligned_multiplier;
                }
            }
        }
        if rolling_avg < Decimal::ZERO {
            confidence *= settings.directional_bias_negative_avg_multiplier;
        }

        let counter_trend = Self::is_counter_trend(htf_trend, direction);
        let mut sizing_multiplier = Decimal::ONE;
        let mut partial_margin = false;

        if counter_trend {
            if confidence < settings.counter_trend_confidence_floor {
                return Err(EngineError::risk_rejected(coin.as_str(), format!("counter-trend confidence {confidence} below floor {}", settings.counter_trend_confidence_floor)));
            }
            if recent_flip {
                return Err(EngineError::risk_rejected(coin.as_str(), "counter-trend entry blocked by trend-flip cooldown"));
            }

            let conditions_met = Self::count_counter_trend_conditions(signal, ltf, settings);
            if conditions_met < settings.counter_trend_min_conditions {
                return Err(EngineError::risk_rejected(
                    coin.as_str(),
                    format!("counter-trend requires >= {} of 5 conditions, got {conditions_met}", settings.counter_trend_min_conditions),
                ));
            }
        } else {
            let trend_aligned = match direction {
                Direction::Long => htf.current_price >= htf.ema20.value.unwrap_or(htf.current_price) && ltf.current_price >= ltf.ema20.value.unwrap_or(ltf.current_price),
                Direction::Short => htf.current_price <= htf.ema20.value.unwrap_or(htf.current_price) && ltf.current_price <= ltf.ema20.value.unwrap_or(ltf.current_price),
            };
            if trend_aligned && volume_ratio >= settings.trend_following_min_volume_ratio {
                if volume_ratio < settings.trend_following_partial_margin_volume_ratio {
                    partial_margin = true;
                } else {
                    confidence = (confidence + settings.trend_following_confidence_boost).min(Decimal::ONE);
                }
            }
        }

        // D. Short enhancement.
        if direction == Direction::Short {
            let rsi = ltf.rsi14.value.unwrap_or(dec!(50));
            if rsi > settings.short_enhancement_rsi_threshold && volume_ratio > settings.short_enhancement_volume_ratio && htf_trend == Trend::Bearish {
                sizing_multiplier *= settings.short_enhancement_multiplier;
            }
        }

        // C. Coin-specific stop-loss shaping.
        let stop_loss = ai.stop_loss.map(|sl| {
            let multiplier = settings.coin_stop_loss_multipliers.get(coin.as_str()).copied().unwrap_or(Decimal::ONE);
            match direction {
                Direction::Long => htf.current_price - (htf.current_price - sl) * multiplier,
                Direction::Short => htf.current_price + (sl - htf.current_price) * multiplier,
            }
        });

        let leverage = Self::clamp_leverage(ai.leverage, config.risk.leverage_floor, config.risk.max_leverage);

        debug!(%coin, %confidence, %counter_trend, %partial_margin, %sizing_multiplier, "validated entry");

        Ok(ValidatedEntry {
            direction,
            confidence,
            sizing_multiplier,
            partial_margin,
            leverage,
            stop_loss,
        })
    }

    fn count_counter_trend_conditions(signal: Signal, ltf: &IndicatorBundle, settings: &crate::config::DecisionSettings) -> u8 {
        let mut met = 0u8;
        let direction = signal.direction();
        let ema20 = ltf.ema20.value;
        let price = ltf.current_price;

        if let (Some(ema20), Some(direction)) = (ema20, direction) {
            let momentum_supportive = match direction {
                Direction::Long => price > ema20,
                Direction::Short => price < ema20,
            };
            if momentum_supportive {
                met += 1;
            }
        }

        if ltf.volume_ratio() > settings.counter_trend_volume_ratio {
            met += 1;
        }

        let rsi = ltf.rsi14.value.unwrap_or(dec!(50));
        let rsi_extreme = match direction {
            Some(Direction::Long) => rsi < settings.counter_trend_rsi_extreme_long,
            Some(Direction::Short) => rsi > settings.counter_trend_rsi_extreme_short,
            None => false,
        };
        if rsi_extreme {
            met += 1;
        }

        if let Some(ema20) = ema20 {
            if !price.is_zero() {
                let distance_pct = ((price - ema20) / price).abs() * Decimal::from(100);
                if distance_pct < settings.counter_trend_ema_proximity_pct {
                    met += 1;
                }
            }
        }

        if let (Some(macd_line), Some(macd_signal), Some(direction)) = (ltf.macd_line.value, ltf.macd_signal.value, direction) {
            let divergence_supportive = match direction {
                Direction::Long => macd_line > macd_signal,
                Direction::Short => macd_line < macd_signal,
            };
            if divergence_supportive {
                met += 1;
            }
        }

        met
    }

    fn clamp_leverage(requested: Option<u32>, floor: u32, cap: u32) -> u32 {
        let ceiling = cap.min(10);
        requested.unwrap_or(ceiling).clamp(floor, ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SeriesValue;

    fn config_handle() -> Arc<RwLock<EngineConfig>> {
        Arc::new(RwLock::new(EngineConfig::default()))
    }

    fn bundle(price: Decimal, ema20: Decimal, rsi: Decimal, macd_line: Decimal, macd_signal: Decimal, volume: Decimal, avg_volume: Decimal) -> IndicatorBundle {
        IndicatorBundle {
            current_price: price,
            ema20: SeriesValue::new(Some(ema20), &[ema20]),
            ema50: SeriesValue::default(),
            rsi14: SeriesValue::new(Some(rsi), &[rsi]),
            rsi7: None,
            macd_line: SeriesValue::new(Some(macd_line), &[macd_line]),
            macd_signal: SeriesValue::new(Some(macd_signal), &[macd_signal]),
            macd_histogram: SeriesValue::default(),
            atr14: SeriesValue::default(),
            atr3: None,
            current_volume: volume,
            mean_volume_20: Some(avg_volume),
        }
    }

    fn ai(signal: Signal, confidence: Decimal) -> AiDecision {
        AiDecision {
            signal,
            leverage: Some(10),
            confidence: Some(confidence),
            profit_target: None,
            stop_loss: None,
            risk_usd: None,
            invalidation_condition: None,
            justification: None,
        }
    }

    #[tokio::test]
    async fn s1_trend_following_long_boosts_confidence() {
        let validator = DecisionValidator::new(config_handle());
        let htf = bundle(dec!(100.0), dec!(98.0), dec!(55), dec!(0), dec!(0), dec!(1000), dec!(1000));
        let ltf = bundle(dec!(100.2), dec!(100.0), dec!(55), dec!(0.1), dec!(0.05), dec!(1200), dec!(1000));
        let decision = ai(Signal::BuyToEnter, dec!(0.65));
        let bias = DirectionalBias::default();

        let result = validator
            .validate_entry(&Symbol::new("X"), Signal::BuyToEnter, &decision, &htf, &ltf, Trend::Bullish, false, &bias)
            .await
            .unwrap();

        assert_eq!(result.direction, Direction::Long);
        assert!(result.confidence > dec!(0.65));
        assert!(!result.partial_margin);
    }

    #[tokio::test]
    async fn s2_counter_trend_short_vetoed_by_volume_penalty() {
        let validator = DecisionValidator::new(config_handle());
        let htf = bundle(dec!(105.0), dec!(100.0), dec!(50), dec!(0), dec!(0), dec!(1000), dec!(1000));
        let ltf = bundle(dec!(98.0), dec!(100.0), dec!(50), dec!(-0.1), dec!(0.05), dec!(250), dec!(1000));
        let decision = ai(Signal::SellToEnter, dec!(0.80));
        let bias = DirectionalBias::default();

        let result = validator
            .validate_entry(&Symbol::new("X"), Signal::SellToEnter, &decision, &htf, &ltf, Trend::Bullish, false, &bias)
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn s3_counter_trend_long_accepted_on_five_of_five() {
        let validator = DecisionValidator::new(config_handle());
        let htf = bundle(dec!(95.0), dec!(100.0), dec!(50), dec!(0), dec!(0), dec!(1000), dec!(1000));
        let ltf = bundle(dec!(100.3), dec!(100.0), dec!(22), dec!(0.2), dec!(0.05), dec!(1800), dec!(1000));
        // Bearish trend misaligns with a Long entry, so the unconditional
        // directional-bias misaligned multiplier (0.9) now always applies
        // even on a fresh bias; start above the counter-trend floor to
        // absorb it.
        let decision = ai(Signal::BuyToEnter, dec!(0.90));
        let bias = DirectionalBias::default();

        let result = validator
            .validate_entry(&Symbol::new("X"), Signal::BuyToEnter, &decision, &htf, &ltf, Trend::Bearish, false, &bias)
            .await
            .unwrap();

        assert_eq!(result.direction, Direction::Long);
    }

    #[tokio::test]
    async fn counter_trend_blocked_during_flip_cooldown() {
        let validator = DecisionValidator::new(config_handle());
        let htf = bundle(dec!(95.0), dec!(100.0), dec!(50), dec!(0), dec!(0), dec!(1000), dec!(1000));
        let ltf = bundle(dec!(100.3), dec!(100.0), dec!(22), dec!(0.2), dec!(0.05), dec!(1800), dec!(1000));
        let decision = ai(Signal::BuyToEnter, dec!(0.80));
        let bias = DirectionalBias::default();

        let result = validator
            .validate_entry(&Symbol::new("X"), Signal::BuyToEnter, &decision, &htf, &ltf, Trend::Bearish, true, &bias)
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn short_enhancement_applies_sizing_multiplier() {
        let validator = DecisionValidator::new(config_handle());
        let htf = bundle(dec!(95.0), dec!(100.0), dec!(50), dec!(0), dec!(0), dec!(1000), dec!(1000));
        let ltf = bundle(dec!(99.0), dec!(100.0), dec!(75), dec!(-0.2), dec!(0.05), dec!(1800), dec!(1000));
        let decision = ai(Signal::SellToEnter, dec!(0.80));
        let bias = DirectionalBias::default();

        let result = validator
            .validate_entry(&Symbol::new("X"), Signal::SellToEnter, &decision, &htf, &ltf, Trend::Bearish, false, &bias)
            .await
            .unwrap();

        assert_eq!(result.sizing_multiplier, dec!(1.15));
    }
}
