use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ExchangeSettings;
use crate::error::EngineError;
use crate::market_data::CandleSource;
use crate::types::{Candle, Direction, OrderType, Symbol, SymbolFilters, TimeFrame};

const FUTURES_API: &str = "https://fapi.binance.com";
const FUTURES_TESTNET: &str = "https://testnet.binancefuture.com";

type HmacSha256 = Hmac<Sha256>;

/// What the engine needs from a live USDⓈ-M futures connection (spec.md
/// §4.9). Kept separate from `CandleSource` since simulation mode still
/// wants real candles with no order placement.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_account_overview(&self) -> Result<AccountOverview, EngineError>;
    async fn get_positions_snapshot(&self) -> Result<Vec<ExchangePosition>, EngineError>;
    async fn place_market_order(
        &self,
        coin: &Symbol,
        direction: Direction,
        qty: Decimal,
        leverage: u32,
        price_ref: Decimal,
        reduce_only: bool,
    ) -> Result<ExchangeOrderResult, EngineError>;
    async fn close_position(&self, coin: &Symbol) -> Result<(), EngineError>;
    async fn place_take_profit_order(&self, coin: &Symbol, direction: Direction, qty: Decimal, trigger: Decimal) -> Result<(), EngineError>;
    async fn place_stop_loss_order(&self, coin: &Symbol, direction: Direction, qty: Decimal, trigger: Decimal) -> Result<(), EngineError>;
    async fn cancel_all_orders_for_symbol(&self, coin: &Symbol) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Default)]
pub struct AccountOverview {
    pub wallet_balance: Decimal,
    pub available_balance: Decimal,
}

#[derive(Debug, Clone)]
pub struct ExchangePosition {
    pub symbol: Symbol,
    pub direction: Direction,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
}

#[derive(Debug, Clone)]
pub struct ExchangeOrderResult {
    pub exchange_order_id: String,
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
}

/// Simulation-mode stand-in: every call is a no-op, matching spec.md §4.9
/// ("in simulation mode this is a no-op"). The market-data side keeps
/// reading real candles through a separate `CandleSource`, unaffected by
/// this choice.
pub struct NoopExchangeAdapter;

#[async_trait]
impl ExchangeAdapter for NoopExchangeAdapter {
    async fn get_account_overview(&self) -> Result<AccountOverview, EngineError> {
        Ok(AccountOverview::default())
    }

    async fn get_positions_snapshot(&self) -> Result<Vec<ExchangePosition>, EngineError> {
        Ok(Vec::new())
    }

    async fn place_market_order(
        &self,
        _coin: &Symbol,
        _direction: Direction,
        qty: Decimal,
        _leverage: u32,
        price_ref: Decimal,
        _reduce_only: bool,
    ) -> Result<ExchangeOrderResult, EngineError> {
        Ok(ExchangeOrderResult { exchange_order_id: "simulated".into(), filled_quantity: qty, average_fill_price: Some(price_ref) })
    }

    async fn close_position(&self, _coin: &Symbol) -> Result<(), EngineError> {
        Ok(())
    }

    async fn place_take_profit_order(&self, _coin: &Symbol, _direction: Direction, _qty: Decimal, _trigger: Decimal) -> Result<(), EngineError> {
        Ok(())
    }

    async fn place_stop_loss_order(&self, _coin: &Symbol, _direction: Direction, _qty: Decimal, _trigger: Decimal) -> Result<(), EngineError> {
        Ok(())
    }

    async fn cancel_all_orders_for_symbol(&self, _coin: &Symbol) -> Result<(), EngineError> {
        Ok(())
    }
}

/// USDⓈ-M futures client, generalizing the teacher's `BinanceClient` (spot,
/// Binance.US) from `exchange::binance` into the futures surface spec.md
/// §4.9/§6 names. Keeps the HMAC-SHA256 query-signing idiom; quantities and
/// prices are rounded through preloaded `SymbolFilters` before every order.
pub struct BinanceFuturesClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    recv_window_ms: u64,
    margin_type: String,
    default_leverage: u32,
    symbol_filters: RwLock<HashMap<Symbol, SymbolFilters>>,
    leverage_cache: RwLock<HashMap<Symbol, u32>>,
}

impl BinanceFuturesClient {
    pub fn new(settings: &ExchangeSettings) -> Self {
        let base_url = if settings.testnet { FUTURES_TESTNET } else { FUTURES_API }.to_string();
        Self {
            http: Client::new(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            secret_key: settings.secret_key.clone().unwrap_or_default(),
            base_url,
            recv_window_ms: settings.recv_window_ms,
            margin_type: settings.margin_type.clone(),
            default_leverage: settings.default_leverage,
            symbol_filters: RwLock::new(HashMap::new()),
            leverage_cache: RwLock::new(HashMap::new()),
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes()).expect("HMAC accepts a key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let timestamp = Utc::now().timestamp_millis();
        let mut parts: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        parts.push(format!("timestamp={timestamp}"));
        parts.push(format!("recvWindow={}", self.recv_window_ms));
        let query = parts.join("&");
        let signature = self.sign(&query);
        format!("{query}&signature={signature}")
    }

    /// Fetches `exchangeInfo` and caches lot/tick/min-notional filters for
    /// the given coins (spec.md §4.9 "preloads symbol filters" on startup).
    pub async fn preload_symbol_filters(&self, coins: &[Symbol]) -> Result<(), EngineError> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let resp: ExchangeInfoResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::transient(format!("exchangeInfo request failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::transient(format!("malformed exchangeInfo response: {e}")))?;

        let wanted: std::collections::HashSet<String> = coins.iter().map(|c| c.futures_symbol()).collect();
        let mut filters = self.symbol_filters.write().expect("symbol filter lock poisoned");
        for entry in resp.symbols {
            if !wanted.contains(&entry.symbol) {
                continue;
            }
            let Some(coin) = coins.iter().find(|c| c.futures_symbol() == entry.symbol) else { continue };
            let mut quantity_step = Decimal::ZERO;
            let mut min_quantity = Decimal::ZERO;
            let mut price_tick = Decimal::ZERO;
            let mut min_notional = Decimal::ZERO;
            for filter in entry.filters {
                match filter.filter_type.as_str() {
                    "LOT_SIZE" => {
                        quantity_step = parse_or_zero(&filter.step_size);
                        min_quantity = parse_or_zero(&filter.min_qty);
                    }
                    "PRICE_FILTER" => price_tick = parse_or_zero(&filter.tick_size),
                    "MIN_NOTIONAL" | "NOTIONAL" => min_notional = parse_or_zero(&filter.notional),
                    _ => {}
                }
            }
            filters.insert(coin.clone(), SymbolFilters { quantity_step, price_tick, min_notional, min_quantity });
        }
        info!(loaded = filters.len(), "preloaded futures symbol filters");
        Ok(())
    }

    fn filters_for(&self, coin: &Symbol) -> SymbolFilters {
        self.symbol_filters
            .read()
            .expect("symbol filter lock poisoned")
            .get(coin)
            .copied()
            .unwrap_or(SymbolFilters { quantity_step: Decimal::ZERO, price_tick: Decimal::ZERO, min_notional: Decimal::ZERO, min_quantity: Decimal::ZERO })
    }

    /// Sets leverage on first use for a symbol and caches it, per spec.md
    /// §4.9 ("leverage is set lazily on first order ... and cached").
    async fn ensure_leverage(&self, coin: &Symbol, leverage: u32) -> Result<(), EngineError> {
        {
            let cache = self.leverage_cache.read().expect("leverage cache lock poisoned");
            if cache.get(coin) == Some(&leverage) {
                return Ok(());
            }
        }

        let url = format!("{}/fapi/v1/leverage", self.base_url);
        let params = [("symbol", coin.futures_symbol()), ("leverage", leverage.to_string())];
        let query = self.signed_query(&params);
        self.http
            .post(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| EngineError::transient(format!("set leverage failed: {e}")))?;

        self.leverage_cache.write().expect("leverage cache lock poisoned").insert(coin.clone(), leverage);
        debug!(coin = %coin, leverage, "leverage cached for symbol");
        Ok(())
    }

    async fn signed_get<T: for<'de> Deserialize<'de>>(&self, path: &str, params: &[(&str, String)]) -> Result<T, EngineError> {
        let query = self.signed_query(params);
        let url = format!("{}{path}?{query}", self.base_url);
        self.http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| EngineError::transient(format!("{path} request failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::transient(format!("malformed {path} response: {e}")))
    }
}

fn parse_or_zero(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap_or(Decimal::ZERO)
}

#[async_trait]
impl ExchangeAdapter for BinanceFuturesClient {
    async fn get_account_overview(&self) -> Result<AccountOverview, EngineError> {
        let resp: AccountResponse = self.signed_get("/fapi/v2/account", &[]).await?;
        Ok(AccountOverview {
            wallet_balance: parse_or_zero(&resp.total_wallet_balance),
            available_balance: parse_or_zero(&resp.available_balance),
        })
    }

    async fn get_positions_snapshot(&self) -> Result<Vec<ExchangePosition>, EngineError> {
        let resp: Vec<PositionRiskEntry> = self.signed_get("/fapi/v2/positionRisk", &[]).await?;
        Ok(resp
            .into_iter()
            .filter(|p| parse_or_zero(&p.position_amt) != Decimal::ZERO)
            .map(|p| {
                let quantity = parse_or_zero(&p.position_amt);
                ExchangePosition {
                    symbol: Symbol::new(p.symbol.trim_end_matches("USDT")),
                    direction: if quantity.is_sign_positive() { Direction::Long } else { Direction::Short },
                    quantity: quantity.abs(),
                    entry_price: parse_or_zero(&p.entry_price),
                    leverage: p.leverage.parse().unwrap_or(self.default_leverage),
                }
            })
            .collect())
    }

    async fn place_market_order(
        &self,
        coin: &Symbol,
        direction: Direction,
        qty: Decimal,
        leverage: u32,
        price_ref: Decimal,
        reduce_only: bool,
    ) -> Result<ExchangeOrderResult, EngineError> {
        self.ensure_leverage(coin, leverage).await?;

        let filters = self.filters_for(coin);
        let rounded_qty = filters.round_quantity(qty);
        if rounded_qty < filters.min_quantity || rounded_qty.is_zero() {
            return Err(EngineError::invalid_data(coin.as_str(), format!("order quantity {rounded_qty} below exchange minimum {}", filters.min_quantity)));
        }
        let notional = rounded_qty * price_ref;
        if notional < filters.min_notional {
            return Err(EngineError::invalid_data(coin.as_str(), format!("order notional {notional} below exchange minimum {}", filters.min_notional)));
        }

        let side = match direction {
            Direction::Long => "BUY",
            Direction::Short => "SELL",
        };
        let url = format!("{}/fapi/v1/order", self.base_url);
        let params = [
            ("symbol", coin.futures_symbol()),
            ("side", side.to_string()),
            ("type", OrderType::Market.as_str().to_string()),
            ("quantity", rounded_qty.to_string()),
            ("reduceOnly", reduce_only.to_string()),
        ];
        let query = self.signed_query(&params);
        let resp: OrderResponse = self
            .http
            .post(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| EngineError::transient(format!("place order failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::transient(format!("malformed order response: {e}")))?;

        Ok(ExchangeOrderResult {
            exchange_order_id: resp.order_id.to_string(),
            filled_quantity: parse_or_zero(&resp.executed_qty),
            average_fill_price: resp.avg_price.as_deref().map(parse_or_zero),
        })
    }

    async fn close_position(&self, coin: &Symbol) -> Result<(), EngineError> {
        let positions = self.get_positions_snapshot().await?;
        let Some(position) = positions.into_iter().find(|p| &p.symbol == coin) else {
            warn!(coin = %coin, "close_position called with no matching exchange position");
            return Ok(());
        };
        let closing_direction = position.direction.opposite();
        self.place_market_order(coin, closing_direction, position.quantity, position.leverage, position.entry_price, true).await?;
        Ok(())
    }

    async fn place_take_profit_order(&self, coin: &Symbol, direction: Direction, qty: Decimal, trigger: Decimal) -> Result<(), EngineError> {
        self.place_stop_style_order(coin, direction, qty, trigger, OrderType::TakeProfitMarket).await
    }

    async fn place_stop_loss_order(&self, coin: &Symbol, direction: Direction, qty: Decimal, trigger: Decimal) -> Result<(), EngineError> {
        self.place_stop_style_order(coin, direction, qty, trigger, OrderType::StopMarket).await
    }

    async fn cancel_all_orders_for_symbol(&self, coin: &Symbol) -> Result<(), EngineError> {
        let url = format!("{}/fapi/v1/allOpenOrders", self.base_url);
        let params = [("symbol", coin.futures_symbol())];
        let query = self.signed_query(&params);
        self.http
            .delete(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| EngineError::transient(format!("cancel all orders failed: {e}")))?;
        Ok(())
    }
}

impl BinanceFuturesClient {
    async fn place_stop_style_order(&self, coin: &Symbol, direction: Direction, qty: Decimal, trigger: Decimal, order_type: OrderType) -> Result<(), EngineError> {
        let filters = self.filters_for(coin);
        let rounded_qty = filters.round_quantity(qty);
        let rounded_trigger = filters.round_price(trigger);
        // Exiting side is opposite of the position's own direction.
        let side = match direction.opposite() {
            Direction::Long => "BUY",
            Direction::Short => "SELL",
        };
        let url = format!("{}/fapi/v1/order", self.base_url);
        let params = [
            ("symbol", coin.futures_symbol()),
            ("side", side.to_string()),
            ("type", order_type.as_str().to_string()),
            ("quantity", rounded_qty.to_string()),
            ("stopPrice", rounded_trigger.to_string()),
            ("reduceOnly", "true".to_string()),
        ];
        let query = self.signed_query(&params);
        self.http
            .post(format!("{url}?{query}"))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| EngineError::transient(format!("place {} order failed: {e}", order_type.as_str())))?;
        Ok(())
    }
}

#[async_trait]
impl CandleSource for BinanceFuturesClient {
    async fn fetch_klines(&self, symbol: &Symbol, interval: TimeFrame, limit: u32) -> Result<Vec<Candle>, EngineError> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol.futures_symbol(),
            interval.as_str(),
            limit
        );
        let resp: Vec<Vec<serde_json::Value>> = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::transient(format!("klines request failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::transient(format!("malformed klines response: {e}")))?;

        resp.into_iter()
            .map(|k| {
                let open_time = k.first().and_then(|v| v.as_i64()).unwrap_or(0);
                let open = k.get(1).and_then(|v| v.as_str()).unwrap_or("0");
                let high = k.get(2).and_then(|v| v.as_str()).unwrap_or("0");
                let low = k.get(3).and_then(|v| v.as_str()).unwrap_or("0");
                let close = k.get(4).and_then(|v| v.as_str()).unwrap_or("0");
                let volume = k.get(5).and_then(|v| v.as_str()).unwrap_or("0");
                let close_time = k.get(6).and_then(|v| v.as_i64()).unwrap_or(0);

                Ok(Candle {
                    symbol: symbol.clone(),
                    timeframe: interval,
                    open_time: Utc.timestamp_millis_opt(open_time).single().unwrap_or_else(Utc::now),
                    close_time: Utc.timestamp_millis_opt(close_time).single().unwrap_or_else(Utc::now),
                    open: parse_or_zero(open),
                    high: parse_or_zero(high),
                    low: parse_or_zero(low),
                    close: parse_or_zero(close),
                    volume: parse_or_zero(volume),
                    is_closed: true,
                })
            })
            .collect()
    }

    async fn open_interest(&self, symbol: &Symbol) -> Result<Decimal, EngineError> {
        let url = format!("{}/fapi/v1/openInterest?symbol={}", self.base_url, symbol.futures_symbol());
        let resp: OpenInterestResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::transient(format!("open interest request failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::transient(format!("malformed open interest response: {e}")))?;
        Ok(parse_or_zero(&resp.open_interest))
    }

    async fn funding_rate(&self, symbol: &Symbol) -> Result<Decimal, EngineError> {
        let url = format!("{}/fapi/v1/premiumIndex?symbol={}", self.base_url, symbol.futures_symbol());
        let resp: PremiumIndexResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::transient(format!("premium index request failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::transient(format!("malformed premium index response: {e}")))?;
        Ok(parse_or_zero(&resp.last_funding_rate))
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfoEntry>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfoEntry {
    symbol: String,
    filters: Vec<SymbolFilterEntry>,
}

#[derive(Debug, Deserialize, Default)]
struct SymbolFilterEntry {
    #[serde(rename = "filterType")]
    filter_type: String,
    #[serde(rename = "stepSize", default)]
    step_size: String,
    #[serde(rename = "minQty", default)]
    min_qty: String,
    #[serde(rename = "tickSize", default)]
    tick_size: String,
    #[serde(default)]
    notional: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(rename = "totalWalletBalance")]
    total_wallet_balance: String,
    #[serde(rename = "availableBalance")]
    available_balance: String,
}

#[derive(Debug, Deserialize)]
struct PositionRiskEntry {
    symbol: String,
    #[serde(rename = "positionAmt")]
    position_amt: String,
    #[serde(rename = "entryPrice")]
    entry_price: String,
    leverage: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderId")]
    order_id: u64,
    #[serde(rename = "executedQty")]
    executed_qty: String,
    #[serde(rename = "avgPrice")]
    avg_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenInterestResponse {
    #[serde(rename = "openInterest")]
    open_interest: String,
}

#[derive(Debug, Deserialize)]
struct PremiumIndexResponse {
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_adapter_reports_zero_balance_and_no_positions() {
        let adapter = NoopExchangeAdapter;
        let overview = tokio_test::block_on(adapter.get_account_overview()).unwrap();
        assert_eq!(overview.wallet_balance, Decimal::ZERO);
        let positions = tokio_test::block_on(adapter.get_positions_snapshot()).unwrap();
        assert!(positions.is_empty());
    }

    #[test]
    fn parse_or_zero_falls_back_on_garbage_input() {
        assert_eq!(parse_or_zero("not-a-number"), Decimal::ZERO);
        assert_eq!(parse_or_zero("1.5"), Decimal::new(15, 1));
    }
}
