#![allow(dead_code)]
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => -Decimal::ONE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFrame {
    M1,
    M3,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "1m",
            TimeFrame::M3 => "3m",
            TimeFrame::M5 => "5m",
            TimeFrame::M15 => "15m",
            TimeFrame::H1 => "1h",
            TimeFrame::H4 => "4h",
            TimeFrame::D1 => "1d",
        }
    }

    pub fn to_minutes(&self) -> u64 {
        match self {
            TimeFrame::M1 => 1,
            TimeFrame::M3 => 3,
            TimeFrame::M5 => 5,
            TimeFrame::M15 => 15,
            TimeFrame::H1 => 60,
            TimeFrame::H4 => 240,
            TimeFrame::D1 => 1440,
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Simulation,
    Live,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Simulation => write!(f, "simulation"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

/// The AI's raw per-coin instruction for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    BuyToEnter,
    SellToEnter,
    Hold,
    ClosePosition,
}

impl Signal {
    pub fn is_entry(&self) -> bool {
        matches!(self, Signal::BuyToEnter | Signal::SellToEnter)
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Signal::BuyToEnter => Some(Direction::Long),
            Signal::SellToEnter => Some(Direction::Short),
            _ => None,
        }
    }
}

/// Classified trend state for a coin, per spec.md §3/§4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
    Unknown,
}

impl Default for Trend {
    fn default() -> Self {
        Trend::Unknown
    }
}

impl Trend {
    pub fn agrees_with(&self, direction: Direction) -> bool {
        match (self, direction) {
            (Trend::Bullish, Direction::Long) => true,
            (Trend::Bearish, Direction::Short) => true,
            _ => false,
        }
    }

    pub fn opposes(&self, direction: Direction) -> bool {
        match (self, direction) {
            (Trend::Bullish, Direction::Short) => true,
            (Trend::Bearish, Direction::Long) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bullish => write!(f, "BULLISH"),
            Trend::Bearish => write!(f, "BEARISH"),
            Trend::Neutral => write!(f, "NEUTRAL"),
            Trend::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    AiClose,
    StallTimeout,
    MarginLossCut,
    PartialProfit,
    TrailingStop,
    TakeProfit,
    StopLoss,
    ManualOverride,
    EmergencyStop,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::AiClose => "ai_close_position",
            CloseReason::StallTimeout => "stall_timeout",
            CloseReason::MarginLossCut => "margin_loss_cut",
            CloseReason::PartialProfit => "partial_profit",
            CloseReason::TrailingStop => "trailing_stop",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::ManualOverride => "manual_override",
            CloseReason::EmergencyStop => "emergency_stop",
        };
        write!(f, "{}", s)
    }
}
