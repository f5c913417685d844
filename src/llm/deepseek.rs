use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EngineError;
use crate::types::{AiDecision, Signal, Symbol};

use super::adapter::{DecisionMap, EngineSnapshot, LlmClient};

/// Transport for the remote chat-completions model (spec.md §4.8, §6
/// "Exchange REST" sibling for LLM calls). Grounded on `DeepSeekAPI` in the
/// original and on the teacher's `reqwest::Client` usage in
/// `exchange::binance::BinanceClient` — a bare client plus a bearer header,
/// no HMAC signing needed here.
pub struct DeepSeekClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl DeepSeekClient {
    pub fn new(endpoint: String, api_key: String, model: String) -> Self {
        Self { http: Client::new(), endpoint, api_key, model }
    }
}

#[async_trait]
impl LlmClient for DeepSeekClient {
    async fn request_decisions(&self, snapshot: &EngineSnapshot) -> Result<DecisionMap, EngineError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user", content: serde_json::to_string(snapshot).map_err(|e| EngineError::ParseError(e.to_string()))? },
            ],
            temperature: 0.7,
            max_tokens: 4096,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::transient(format!("deepseek request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(EngineError::transient(format!("deepseek returned {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::ParseError(format!("deepseek returned {status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ParseError(format!("malformed deepseek response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::ParseError("deepseek response had no choices".into()))?;

        parse_decisions(&content)
    }
}

/// Pulls the `DECISIONS\n{...}` JSON block out of the model's free-text
/// reply and parses it into per-coin decisions. Unknown signal strings or
/// malformed JSON become a `ParseError`, which the adapter turns into a
/// safe-hold map rather than propagating (spec.md §7).
fn parse_decisions(content: &str) -> Result<DecisionMap, EngineError> {
    let json_part = match content.split_once("DECISIONS") {
        Some((_, after)) => after,
        None => content,
    };

    let json_start = json_part.find('{').ok_or_else(|| EngineError::ParseError("no JSON object in response".into()))?;
    let json_end = json_part.rfind('}').ok_or_else(|| EngineError::ParseError("unterminated JSON object in response".into()))?;
    if json_end < json_start {
        return Err(EngineError::ParseError("malformed JSON bounds in response".into()));
    }

    let raw: HashMap<String, AiDecision> = serde_json::from_str(&json_part[json_start..=json_end])
        .map_err(|e| EngineError::ParseError(format!("decisions JSON did not match expected shape: {e}")))?;

    Ok(raw.into_iter().map(|(coin, decision)| (Symbol::new(coin), decision)).collect())
}

const SYSTEM_PROMPT: &str = "Trading decision assistant; reply with a DECISIONS JSON object keyed by coin.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decisions_block_embedded_in_free_text() {
        let content = r#"
CHAIN_OF_THOUGHTS
Some narrative text that might itself contain braces { like this }.
DECISIONS
{"BTC": {"signal": "buy_to_enter", "leverage": 10, "confidence": 0.7, "profit_target": 110.0, "stop_loss": 90.0, "risk_usd": 5.0, "invalidation_condition": null, "justification": "strong trend"}, "ETH": {"signal": "hold"}}
"#;
        let decisions = parse_decisions(content).unwrap();
        assert_eq!(decisions.get(&Symbol::new("BTC")).unwrap().signal, Signal::BuyToEnter);
        assert_eq!(decisions.get(&Symbol::new("ETH")).unwrap().signal, Signal::Hold);
    }

    #[test]
    fn rejects_content_with_no_json_object() {
        assert!(parse_decisions("no decisions here").is_err());
    }
}
