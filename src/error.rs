use thiserror::Error;

/// Error taxonomy for the trading engine. Every sub-step surfaces one of
/// these; the scheduler catches them at cycle boundaries and never lets one
/// unwind past a loop tick.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient error, retries exhausted: {0}")]
    Transient(String),

    #[error("invalid market data for {coin}: {reason}")]
    InvalidData { coin: String, reason: String },

    #[error("failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("risk gate rejected entry for {coin}: {reason}")]
    RiskRejected { coin: String, reason: String },

    #[error("state store write failed: {0}")]
    StoreWrite(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        EngineError::Transient(msg.into())
    }

    pub fn invalid_data(coin: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidData {
            coin: coin.into(),
            reason: reason.into(),
        }
    }

    pub fn risk_rejected(coin: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::RiskRejected {
            coin: coin.into(),
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
