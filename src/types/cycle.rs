use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{AiDecision, Symbol};

/// One append-only row of cycle history (spec.md §3 "Cycle record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_number: u64,
    pub timestamp: DateTime<Utc>,
    pub prompt_summary: String,
    pub chain_of_thought: Option<String>,
    pub decisions: HashMap<Symbol, AiDecision>,
    pub error: Option<String>,
}

/// External operator's out-of-band instruction, read-and-delete once per
/// cycle (spec.md §3 "Manual override").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualOverride {
    pub timestamp: DateTime<Utc>,
    pub decisions: HashMap<Symbol, AiDecision>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Running,
    Paused,
    Stopped,
    Unknown,
}

impl Default for BotStatus {
    fn default() -> Self {
        BotStatus::Unknown
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotControl {
    pub status: BotStatus,
    pub last_updated: DateTime<Utc>,
    pub action: Option<String>,
}

impl Default for BotControl {
    fn default() -> Self {
        Self {
            status: BotStatus::Running,
            last_updated: Utc::now(),
            action: None,
        }
    }
}
