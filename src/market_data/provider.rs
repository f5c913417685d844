use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::EngineError;
use crate::indicators::{calculate_atr_series, calculate_ema_series, calculate_macd, calculate_rsi_series};
use crate::types::{Candle, IndicatorBundle, Position, SeriesValue, Symbol, TimeFrame};

use super::retry::retry_with_backoff;

const WARMUP_CANDLES: u32 = 50;
const HISTORY_CANDLES: u32 = 10;
const MIN_UNIQUE_CLOSES: usize = 3;
const MIN_ROLLING_VOLUME: u64 = 1000;
const FETCH_ATTEMPTS: u32 = 3;

/// What the exchange adapter must expose for market-data purposes — kept
/// separate from the order-placement surface (`exchange::ExchangeAdapter`)
/// since simulation mode still needs live candles/funding data even with
/// no order placement.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_klines(
        &self,
        symbol: &Symbol,
        interval: TimeFrame,
        limit: u32,
    ) -> Result<Vec<Candle>, EngineError>;

    async fn open_interest(&self, symbol: &Symbol) -> Result<Decimal, EngineError>;

    async fn funding_rate(&self, symbol: &Symbol) -> Result<Decimal, EngineError>;
}

pub struct MarketDataProvider {
    source: Arc<dyn CandleSource>,
}

impl MarketDataProvider {
    pub fn new(source: Arc<dyn CandleSource>) -> Self {
        Self { source }
    }

    /// spec.md §4.1 `prices()`: a price for every configured coin, falling
    /// back through 1m close -> 3m close -> last persisted position price
    /// -> 0.0-with-warning.
    pub async fn prices(
        &self,
        coins: &[Symbol],
        last_known: &HashMap<Symbol, Position>,
    ) -> HashMap<Symbol, Decimal> {
        let mut out = HashMap::new();
        for (i, coin) in coins.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
            let price = self.price_with_fallback(coin, last_known).await;
            out.insert(coin.clone(), price);
        }
        out
    }

    async fn price_with_fallback(&self, coin: &Symbol, last_known: &HashMap<Symbol, Position>) -> Decimal {
        // Fetches the same padded window `indicators()` uses, even though
        // only the last close is needed — `validate_candles` requires
        // MIN_UNIQUE_CLOSES distinct closes, which a tiny window can never
        // satisfy.
        if let Ok(candles) = self.fetch_validated(coin, TimeFrame::M1, WARMUP_CANDLES).await {
            if let Some(last) = candles.last() {
                return last.close;
            }
        }
        if let Ok(candles) = self.fetch_validated(coin, TimeFrame::M3, WARMUP_CANDLES).await {
            if let Some(last) = candles.last() {
                return last.close;
            }
        }
        if let Some(position) = last_known.get(coin) {
            return position.current_price;
        }
        warn!(coin = %coin, "no price available from any fallback tier; reporting 0.0");
        Decimal::ZERO
    }

    /// spec.md §4.1 `indicators(coin, interval)`.
    pub async fn indicators(&self, coin: &Symbol, interval: TimeFrame) -> Result<IndicatorBundle, EngineError> {
        let limit = HISTORY_CANDLES + WARMUP_CANDLES;
        let candles = self.fetch_validated(coin, interval, limit).await?;

        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<Decimal> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<Decimal> = candles.iter().map(|c| c.low).collect();
        let volumes: Vec<Decimal> = candles.iter().map(|c| c.volume).collect();

        let current_price = closes.last().copied().unwrap_or(Decimal::ZERO);
        let current_volume = volumes.last().copied().unwrap_or(Decimal::ZERO);

        let ema20_series = calculate_ema_series(&closes, 20);
        let ema50_series = calculate_ema_series(&closes, 50);
        let rsi14_series = calculate_rsi_series(&closes, 14);
        let (macd_line, macd_signal, macd_hist) = calculate_macd(&closes, 12, 26, 9);
        let atr14_series = calculate_atr_series(&highs, &lows, &closes, 14);

        let mean_volume_20 = crate::types::sma(&volumes, 20);

        let mut bundle = IndicatorBundle {
            current_price,
            ema20: SeriesValue::new(ema20_series.last().copied(), &ema20_series),
            ema50: SeriesValue::new(ema50_series.last().copied(), &ema50_series),
            rsi14: SeriesValue::new(rsi14_series.last().copied(), &rsi14_series),
            rsi7: None,
            macd_line: SeriesValue::new(macd_line.last().copied(), &macd_line),
            macd_signal: SeriesValue::new(macd_signal.last().copied(), &macd_signal),
            macd_histogram: SeriesValue::new(macd_hist.last().copied(), &macd_hist),
            atr14: SeriesValue::new(atr14_series.last().copied(), &atr14_series),
            atr3: None,
            current_volume,
            mean_volume_20,
        };

        if matches!(interval, TimeFrame::M3) {
            let rsi7_series = calculate_rsi_series(&closes, 7);
            let atr3_series = calculate_atr_series(&highs, &lows, &closes, 3);
            bundle.rsi7 = Some(SeriesValue::new(rsi7_series.last().copied(), &rsi7_series));
            bundle.atr3 = Some(SeriesValue::new(atr3_series.last().copied(), &atr3_series));
        }

        Ok(bundle)
    }

    pub async fn open_interest(&self, coin: &Symbol) -> Result<Decimal, EngineError> {
        retry_with_backoff(FETCH_ATTEMPTS, || async { self.source.open_interest(coin).await }).await
    }

    pub async fn funding_rate(&self, coin: &Symbol) -> Result<Decimal, EngineError> {
        retry_with_backoff(FETCH_ATTEMPTS, || async { self.source.funding_rate(coin).await }).await
    }

    /// Fetches a candle window and applies spec.md §4.1's quarantine rules:
    /// non-positive OHLC, a stuck feed (<3 unique closes), zero window
    /// volume, or rolling mean volume below 1000 base units. Any of these
    /// causes a retry with exponential backoff, then a typed failure.
    async fn fetch_validated(
        &self,
        coin: &Symbol,
        interval: TimeFrame,
        limit: u32,
    ) -> Result<Vec<Candle>, EngineError> {
        let coin = coin.clone();
        retry_with_backoff(FETCH_ATTEMPTS, || {
            let coin = coin.clone();
            async move {
                let candles = self.source.fetch_klines(&coin, interval, limit).await?;
                validate_candles(&coin, &candles)?;
                Ok(candles)
            }
        })
        .await
    }
}

fn validate_candles(coin: &Symbol, candles: &[Candle]) -> Result<(), EngineError> {
    if candles.is_empty() {
        return Err(EngineError::invalid_data(coin.as_str(), "empty candle window"));
    }
    if candles.iter().any(|c| !c.is_valid_ohlc()) {
        return Err(EngineError::invalid_data(coin.as_str(), "non-positive OHLC"));
    }

    let mut closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
    closes.sort();
    closes.dedup();
    if closes.len() < MIN_UNIQUE_CLOSES {
        return Err(EngineError::invalid_data(coin.as_str(), "stuck feed: fewer than 3 unique closes"));
    }

    let total_volume: Decimal = candles.iter().map(|c| c.volume).sum();
    if total_volume.is_zero() {
        return Err(EngineError::invalid_data(coin.as_str(), "zero volume over window"));
    }

    let mean_volume = total_volume / Decimal::from(candles.len() as u32);
    if mean_volume < Decimal::from(MIN_ROLLING_VOLUME) {
        return Err(EngineError::invalid_data(coin.as_str(), "rolling mean volume below 1000"));
    }

    Ok(())
}
