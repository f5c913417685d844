use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{CloseReason, Direction, Symbol};

/// Notification severity (teacher: `notifications::Severity`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One entry written to `alerts.json` (spec.md §6, newline-delimited JSON),
/// grounded on the teacher's `notifications::AlertType` enum, adapted to
/// this engine's coin/position domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AlertKind {
    PositionOpened { coin: Symbol, direction: Direction, entry_price: Decimal, margin_usd: Decimal },
    PositionClosed { coin: Symbol, reason: CloseReason, realized_pnl: Decimal },
    StopLossTriggered { coin: Symbol, price: Decimal, loss: Decimal },
    TakeProfitTriggered { coin: Symbol, price: Decimal, profit: Decimal },
    PartialProfitTaken { coin: Symbol, fraction: Decimal, realized_pnl: Decimal },
    TrailingStopTightened { coin: Symbol, new_stop: Decimal, tier: &'static str },
    RiskRejected { coin: Symbol, reason: String },
    EmergencyStop { reason: String },
    EngineError { component: String, message: String },
}

impl AlertKind {
    pub fn default_severity(&self) -> Severity {
        match self {
            AlertKind::PositionOpened { .. } => Severity::Info,
            AlertKind::PositionClosed { .. } => Severity::Info,
            AlertKind::StopLossTriggered { .. } => Severity::Warning,
            AlertKind::TakeProfitTriggered { .. } => Severity::Info,
            AlertKind::PartialProfitTaken { .. } => Severity::Info,
            AlertKind::TrailingStopTightened { .. } => Severity::Info,
            AlertKind::RiskRejected { .. } => Severity::Warning,
            AlertKind::EmergencyStop { .. } => Severity::Critical,
            AlertKind::EngineError { .. } => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub kind: AlertKind,
}

impl Alert {
    pub fn new(kind: AlertKind) -> Self {
        Self {
            timestamp: Utc::now(),
            severity: kind.default_severity(),
            kind,
        }
    }
}
