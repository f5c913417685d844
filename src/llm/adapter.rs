use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::market_data::retry_with_backoff;
use crate::types::{AiDecision, IndicatorBundle, Portfolio, Signal, Symbol, Trend};

pub type DecisionMap = HashMap<Symbol, AiDecision>;

/// Per-coin view handed to the model: both timeframes' indicator bundles
/// plus the trend bookkeeping the validator also consumes, so the prompt
/// and the post-hoc validation never see different numbers.
#[derive(Debug, Clone, Serialize)]
pub struct CoinSnapshot {
    pub symbol: Symbol,
    pub htf: IndicatorBundle,
    pub ltf: IndicatorBundle,
    pub trend: Trend,
    pub recent_flip: bool,
}

/// Full engine-state snapshot serialized into the remote prompt (spec.md
/// §4.8). Prompt wording itself is out of scope — this is the input the
/// external prompt generator consumes.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub cycle_number: u64,
    pub invocation_count: u64,
    pub timestamp: DateTime<Utc>,
    pub portfolio: Portfolio,
    pub coins: Vec<CoinSnapshot>,
}

/// The transport the engine talks to — a pure request/response boundary so
/// the prompt body and the remote model are both swappable without
/// touching the fallback ladder below. Implemented by `DeepSeekClient` for
/// the live path and by an in-memory fake in tests.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn request_decisions(&self, snapshot: &EngineSnapshot) -> Result<DecisionMap, EngineError>;
}

/// Wraps an `LlmClient` with the timeout/retry/fallback policy from
/// spec.md §4.8, grounded on `DeepSeekAPI.get_ai_decision` /
/// `get_cached_decisions` / `get_safe_hold_decisions` in the original.
pub struct LlmAdapter {
    client: Arc<dyn LlmClient>,
    config: Arc<RwLock<EngineConfig>>,
}

impl LlmAdapter {
    pub fn new(client: Arc<dyn LlmClient>, config: Arc<RwLock<EngineConfig>>) -> Self {
        Self { client, config }
    }

    /// Never fails: a hard timeout or exhausted retries falls back to
    /// replaying the most recent cycle (among `recent_successful`, newest
    /// first) that contained at least one entry signal; any other failure
    /// (including a parse error surfaced by the client) resolves to an
    /// all-hold "safe mode" map. `recent_successful` is supplied by the
    /// caller from cycle history — this module has no store access of its
    /// own.
    pub async fn fetch_decisions(&self, snapshot: &EngineSnapshot, recent_successful: &[DecisionMap]) -> DecisionMap {
        let (timeout_secs, attempts) = {
            let config = self.config.read().await;
            (config.llm.request_timeout_secs, config.llm.max_retry_attempts)
        };

        let attempt = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            retry_with_backoff(attempts, || self.client.request_decisions(snapshot)),
        )
        .await;

        match attempt {
            Ok(Ok(decisions)) => decisions,
            Ok(Err(EngineError::Transient(reason))) => {
                warn!(%reason, "llm call exhausted retries; falling back to cycle replay");
                replay_fallback(recent_successful).unwrap_or_else(|| safe_hold_map(snapshot, "safe mode"))
            }
            Ok(Err(err)) => {
                warn!(error = %err, "llm call failed; returning safe-hold decisions");
                safe_hold_map(snapshot, "safe mode")
            }
            Err(_elapsed) => {
                warn!(timeout_secs, "llm call deadline exceeded; falling back to cycle replay");
                replay_fallback(recent_successful).unwrap_or_else(|| safe_hold_map(snapshot, "safe mode"))
            }
        }
    }
}

/// Newest-first scan of the last five cycles for one that had at least one
/// entry signal.
fn replay_fallback(recent_successful: &[DecisionMap]) -> Option<DecisionMap> {
    recent_successful
        .iter()
        .rev()
        .find(|map| map.values().any(|d| d.signal.is_entry()))
        .cloned()
}

fn safe_hold_map(snapshot: &EngineSnapshot, reason: &str) -> DecisionMap {
    snapshot
        .coins
        .iter()
        .map(|coin| (coin.symbol.clone(), AiDecision::hold(reason)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot() -> EngineSnapshot {
        EngineSnapshot {
            cycle_number: 10,
            invocation_count: 10,
            timestamp: Utc::now(),
            portfolio: Portfolio::new(dec!(1000)),
            coins: vec![CoinSnapshot {
                symbol: Symbol::new("BTC"),
                htf: IndicatorBundle::default(),
                ltf: IndicatorBundle::default(),
                trend: Trend::Neutral,
                recent_flip: false,
            }],
        }
    }

    struct AlwaysOk;
    #[async_trait]
    impl LlmClient for AlwaysOk {
        async fn request_decisions(&self, snapshot: &EngineSnapshot) -> Result<DecisionMap, EngineError> {
            Ok(safe_hold_map(snapshot, "ok"))
        }
    }

    struct AlwaysTransient;
    #[async_trait]
    impl LlmClient for AlwaysTransient {
        async fn request_decisions(&self, _snapshot: &EngineSnapshot) -> Result<DecisionMap, EngineError> {
            Err(EngineError::transient("connection refused"))
        }
    }

    struct AlwaysParseError;
    #[async_trait]
    impl LlmClient for AlwaysParseError {
        async fn request_decisions(&self, _snapshot: &EngineSnapshot) -> Result<DecisionMap, EngineError> {
            Err(EngineError::ParseError("malformed json".into()))
        }
    }

    /// Succeeds after the first transient failure, so the retry loop
    /// inside `fetch_decisions` (via `retry_with_backoff`) exercises its
    /// retry path instead of exhausting immediately.
    struct FlakyOnce {
        calls: AtomicUsize,
    }
    #[async_trait]
    impl LlmClient for FlakyOnce {
        async fn request_decisions(&self, snapshot: &EngineSnapshot) -> Result<DecisionMap, EngineError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(EngineError::transient("timeout"))
            } else {
                Ok(safe_hold_map(snapshot, "recovered"))
            }
        }
    }

    fn config_handle() -> Arc<RwLock<EngineConfig>> {
        Arc::new(RwLock::new(EngineConfig::default()))
    }

    #[tokio::test]
    async fn successful_call_returns_its_own_decisions() {
        let adapter = LlmAdapter::new(Arc::new(AlwaysOk), config_handle());
        let decisions = adapter.fetch_decisions(&snapshot(), &[]).await;
        assert_eq!(decisions.get(&Symbol::new("BTC")).unwrap().justification.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn transient_failure_replays_most_recent_cycle_with_an_entry_signal() {
        let adapter = LlmAdapter::new(Arc::new(AlwaysTransient), config_handle());

        let mut stale_entry = DecisionMap::new();
        stale_entry.insert(
            Symbol::new("BTC"),
            AiDecision { signal: Signal::BuyToEnter, ..AiDecision::hold("") },
        );
        let mut stale_hold = DecisionMap::new();
        stale_hold.insert(Symbol::new("BTC"), AiDecision::hold(""));

        let history = vec![stale_entry.clone(), stale_hold];
        let decisions = adapter.fetch_decisions(&snapshot(), &history).await;
        assert_eq!(decisions, stale_entry);
    }

    #[tokio::test]
    async fn transient_failure_with_no_history_falls_back_to_safe_hold() {
        let adapter = LlmAdapter::new(Arc::new(AlwaysTransient), config_handle());
        let decisions = adapter.fetch_decisions(&snapshot(), &[]).await;
        assert!(decisions.values().all(|d| d.signal == Signal::Hold));
    }

    #[tokio::test]
    async fn parse_error_goes_straight_to_safe_hold_without_replay() {
        let adapter = LlmAdapter::new(Arc::new(AlwaysParseError), config_handle());
        let mut stale_entry = DecisionMap::new();
        stale_entry.insert(
            Symbol::new("BTC"),
            AiDecision { signal: Signal::BuyToEnter, ..AiDecision::hold("") },
        );
        let decisions = adapter.fetch_decisions(&snapshot(), &[stale_entry]).await;
        assert!(decisions.values().all(|d| d.signal == Signal::Hold));
    }

    #[tokio::test]
    async fn retries_before_succeeding_on_a_transient_blip() {
        let adapter = LlmAdapter::new(Arc::new(FlakyOnce { calls: AtomicUsize::new(0) }), config_handle());
        let decisions = adapter.fetch_decisions(&snapshot(), &[]).await;
        assert_eq!(decisions.get(&Symbol::new("BTC")).unwrap().justification.as_deref(), Some("recovered"));
    }
}
