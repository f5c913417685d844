use serde::{Deserialize, Serialize};
use std::fmt;

/// A configured coin (e.g. `"BTC"`, `"SOL"`). Unlike the teacher's
/// `TradingPair` enum, the coin universe here is config-driven rather than
/// a fixed set of variants, since the spec requires an arbitrary list of
/// coins read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(coin: impl Into<String>) -> Self {
        Self(coin.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Binance USDⓈ-M futures contract symbol for this coin (`BTC` -> `BTCUSDT`).
    pub fn futures_symbol(&self) -> String {
        format!("{}USDT", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::new(s)
    }
}
