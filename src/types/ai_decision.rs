use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Signal;

/// One coin's entry in the LLM's decisions map (spec.md §4.8). Every field
/// besides `signal` is optional — the source tolerates a partial dict, so
/// here that becomes an explicit `Option` rather than a sentinel value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiDecision {
    pub signal: Signal,
    pub leverage: Option<u32>,
    pub confidence: Option<Decimal>,
    pub profit_target: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub risk_usd: Option<Decimal>,
    pub invalidation_condition: Option<String>,
    pub justification: Option<String>,
}

impl AiDecision {
    pub fn hold(justification: impl Into<String>) -> Self {
        Self {
            signal: Signal::Hold,
            leverage: None,
            confidence: None,
            profit_target: None,
            stop_loss: None,
            risk_usd: None,
            invalidation_condition: None,
            justification: Some(justification.into()),
        }
    }
}
