use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Direction, Symbol};

/// USDⓈ-M futures order types the exchange adapter actually places
/// (spec.md §6 "Exchange REST").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    TakeProfitMarket,
    StopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            OrderType::StopMarket => "STOP_MARKET",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: Symbol,
    pub direction: Direction,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: Symbol, direction: Direction, quantity: Decimal, reduce_only: bool) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol,
            direction,
            order_type: OrderType::Market,
            quantity,
            stop_price: None,
            reduce_only,
        }
    }

    pub fn take_profit(symbol: Symbol, direction: Direction, quantity: Decimal, trigger: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol,
            direction,
            order_type: OrderType::TakeProfitMarket,
            quantity,
            stop_price: Some(trigger),
            reduce_only: true,
        }
    }

    pub fn stop_loss(symbol: Symbol, direction: Direction, quantity: Decimal, trigger: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol,
            direction,
            order_type: OrderType::StopMarket,
            quantity,
            stop_price: Some(trigger),
            reduce_only: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub symbol: Symbol,
    pub direction: Direction,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn from_request(request: &OrderRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            client_order_id: request.client_order_id.clone(),
            exchange_order_id: None,
            symbol: request.symbol.clone(),
            direction: request.direction,
            order_type: request.order_type,
            status: OrderStatus::Pending,
            quantity: request.quantity,
            average_fill_price: None,
            created_at: Utc::now(),
        }
    }
}

/// Exchange-reported lot/tick/min-notional filters for one futures symbol
/// (spec.md §4.9 "preloads symbol filters").
#[derive(Debug, Clone, Copy)]
pub struct SymbolFilters {
    pub quantity_step: Decimal,
    pub price_tick: Decimal,
    pub min_notional: Decimal,
    pub min_quantity: Decimal,
}

impl SymbolFilters {
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        if self.quantity_step.is_zero() {
            return quantity;
        }
        (quantity / self.quantity_step).floor() * self.quantity_step
    }

    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.price_tick.is_zero() {
            return price;
        }
        (price / self.price_tick).round() * self.price_tick
    }
}
