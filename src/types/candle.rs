use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Symbol, TimeFrame};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: Symbol,
    pub timeframe: TimeFrame,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub is_closed: bool,
}

impl Candle {
    pub fn is_valid_ohlc(&self) -> bool {
        self.open > Decimal::ZERO
            && self.high > Decimal::ZERO
            && self.low > Decimal::ZERO
            && self.close > Decimal::ZERO
    }

    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }
}
