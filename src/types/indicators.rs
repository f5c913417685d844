use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tail series of length 10 alongside each point value, as spec.md §4.1
/// requires ("each accompanied by its tail series of length 10").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesValue {
    pub value: Option<Decimal>,
    pub series: Vec<Decimal>,
}

impl SeriesValue {
    pub fn new(value: Option<Decimal>, full_series: &[Decimal]) -> Self {
        let tail_len = full_series.len().min(10);
        let series = full_series[full_series.len() - tail_len..].to_vec();
        Self { value, series }
    }
}

/// Indicator bundle for one coin on one interval (spec.md §4.1 `indicators`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorBundle {
    pub current_price: Decimal,
    pub ema20: SeriesValue,
    pub ema50: SeriesValue,
    pub rsi14: SeriesValue,
    pub rsi7: Option<SeriesValue>,
    pub macd_line: SeriesValue,
    pub macd_signal: SeriesValue,
    pub macd_histogram: SeriesValue,
    pub atr14: SeriesValue,
    pub atr3: Option<SeriesValue>,
    pub current_volume: Decimal,
    pub mean_volume_20: Option<Decimal>,
}

impl IndicatorBundle {
    pub fn volume_ratio(&self) -> Decimal {
        match self.mean_volume_20 {
            Some(avg) if !avg.is_zero() => self.current_volume / avg,
            _ => Decimal::ZERO,
        }
    }
}
