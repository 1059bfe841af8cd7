use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::OrderSide;

/// Errors surfaced by broker, quote and halt-feed adapters
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Credentials rejected or session token expired
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network failure or timeout
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status that is not an auth failure
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response did not carry a field we cannot do without
    #[error("unexpected response shape: {0}")]
    Shape(String),

    /// The broker does not offer this capability
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

impl BrokerError {
    pub fn is_auth(&self) -> bool {
        matches!(self, BrokerError::Auth(_))
    }
}

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// A position as reported by the broker, normalized at the adapter boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub entry_price: f64,
    /// Positive for long, negative for short
    pub signed_qty: f64,
    pub order_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopLimit,
    Other,
}

impl OrderType {
    /// Map a broker order-type label ("STOP_LOSS", "stop", "LMT", ...)
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "LIMIT" | "LMT" => OrderType::Limit,
            "MARKET" | "MKT" => OrderType::Market,
            "STOP" | "STOP_LOSS" | "STP" | "STOP_MARKET" => OrderType::Stop,
            "STOP_LIMIT" | "STOP_LOSS_LIMIT" | "STP_LMT" => OrderType::StopLimit,
            _ => OrderType::Other,
        }
    }

    pub fn is_stop(self) -> bool {
        matches!(self, OrderType::Stop | OrderType::StopLimit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Working,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "FILLED" => OrderStatus::Filled,
            "PARTIALLY_FILLED" | "PARTIAL_FILLED" => OrderStatus::PartiallyFilled,
            "CANCELLED" | "CANCELED" | "CANCELLING" | "PENDING_CANCEL" => OrderStatus::Cancelled,
            "REJECTED" | "FAILED" => OrderStatus::Rejected,
            "EXPIRED" | "DONE_FOR_DAY" => OrderStatus::Expired,
            _ => OrderStatus::Working,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// A resting (non-terminal) order, normalized at the adapter boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub stop_price: Option<f64>,
    pub quantity: u64,
}

/// Limit entry with attached take-profit and stop-loss children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub limit_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub extended_hours: bool,
}

/// Order and position operations against one trading account.
///
/// Implementations normalize whatever the broker returns into the value
/// types above and handle re-authentication internally (once per call).
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>>;

    /// Active orders only; terminal entries are filtered out
    async fn get_active_orders(&self) -> BrokerResult<Vec<BrokerOrder>>;

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<bool>;

    async fn place_stop_order(
        &self,
        symbol: &str,
        qty: u64,
        stop_price: f64,
        side: OrderSide,
    ) -> BrokerResult<String>;

    async fn place_market_order(&self, symbol: &str, qty: u64, side: OrderSide)
        -> BrokerResult<String>;

    async fn place_bracket_order(&self, order: &BracketOrder) -> BrokerResult<String>;

    /// Atomically move a stop order's trigger price
    async fn modify_stop(&self, _order_id: &str, _new_stop_price: f64) -> BrokerResult<String> {
        Err(BrokerError::Unsupported("modify_stop"))
    }
}

// Lets one client serve as both broker and quote source behind `Arc`
#[async_trait]
impl<T: BrokerGateway + ?Sized> BrokerGateway for std::sync::Arc<T> {
    async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        (**self).get_positions().await
    }

    async fn get_active_orders(&self) -> BrokerResult<Vec<BrokerOrder>> {
        (**self).get_active_orders().await
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<bool> {
        (**self).cancel_order(order_id).await
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        qty: u64,
        stop_price: f64,
        side: OrderSide,
    ) -> BrokerResult<String> {
        (**self).place_stop_order(symbol, qty, stop_price, side).await
    }

    async fn place_market_order(&self, symbol: &str, qty: u64, side: OrderSide)
        -> BrokerResult<String> {
        (**self).place_market_order(symbol, qty, side).await
    }

    async fn place_bracket_order(&self, order: &BracketOrder) -> BrokerResult<String> {
        (**self).place_bracket_order(order).await
    }

    async fn modify_stop(&self, order_id: &str, new_stop_price: f64) -> BrokerResult<String> {
        (**self).modify_stop(order_id, new_stop_price).await
    }
}

/// Round a price to whole cents the way order tickets expect
pub fn round_cents(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}
