use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::broker::{
    round_cents, BracketOrder, BrokerError, BrokerGateway, BrokerOrder, BrokerPosition,
    BrokerResult, OrderStatus, OrderType,
};
use super::quote::QuoteSource;
use super::shape;
use crate::models::{OrderSide, Quote};

pub const WEBULL_API_BASE: &str = "https://api.webull.com/openapi";
const TOKEN_PATH: &str = "/auth/token/create";
const DEFAULT_ORDERS_PER_SECOND: u32 = 4;

// Type alias for the rate limiter to simplify signatures
type OrderRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Connection settings for the Webull OpenAPI gateway
#[derive(Debug, Clone)]
pub struct WebullConfig {
    pub base_url: String,
    pub app_key: String,
    pub app_secret: String,
    pub account_id: String,
    pub timeout: Duration,
    pub orders_per_second: u32,
}

impl WebullConfig {
    /// Read credentials from WEBULL_APP_KEY / WEBULL_APP_SECRET / WEBULL_ACCOUNT_ID
    pub fn from_env(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| anyhow::anyhow!("{} not found in environment", name))
        };
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            app_key: var("WEBULL_APP_KEY")?,
            app_secret: var("WEBULL_APP_SECRET")?,
            account_id: var("WEBULL_ACCOUNT_ID")?,
            timeout,
            orders_per_second: DEFAULT_ORDERS_PER_SECOND,
        })
    }
}

/// Broker gateway backed by the Webull OpenAPI REST endpoints
///
/// Holds a session token; any call answered with 401/403 triggers exactly one
/// re-authentication followed by one retry before the error is surfaced.
pub struct WebullClient {
    client: Client,
    config: WebullConfig,
    token: RwLock<Option<String>>,
    rate_limiter: Arc<OrderRateLimiter>,
}

impl WebullClient {
    pub fn new(config: WebullConfig) -> BrokerResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        let per_second = NonZeroU32::new(config.orders_per_second.max(1))
            .unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            config,
            token: RwLock::new(None),
            rate_limiter,
        })
    }

    /// Seed a previously issued session token (skips the first token request)
    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
            ..self
        }
    }

    /// Exchange app credentials for a fresh session token
    pub async fn authenticate(&self) -> BrokerResult<()> {
        let url = format!("{}{}", self.config.base_url, TOKEN_PATH);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "app_key": self.config.app_key,
                "app_secret": self.config.app_secret,
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BrokerError::Auth(body));
        }
        if !status.is_success() {
            return Err(BrokerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|e| BrokerError::Shape(e.to_string()))?;
        let token = shape::string(
            &shape::unwrap_envelope(value),
            &["token", "access_token", "accessToken"],
        )
        .ok_or_else(|| BrokerError::Shape("token response without token".into()))?;

        *self.token.write().await = Some(token);
        tracing::info!("Authenticated with Webull gateway");
        Ok(())
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> BrokerResult<Value> {
        let token = self.token.read().await.clone().unwrap_or_default();

        let url = format!("{}{}", self.config.base_url, path);
        let mut request = self
            .client
            .request(method, &url)
            .header("x-app-key", &self.config.app_key)
            .header("x-access-token", token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BrokerError::Auth(text));
        }
        if !status.is_success() {
            return Err(BrokerError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| BrokerError::Shape(e.to_string()))
    }

    /// Send a request, authenticating at most once per call: up front when
    /// no token is held, otherwise after the held token is rejected
    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> BrokerResult<Value> {
        let had_token = self.token.read().await.is_some();
        if !had_token {
            self.authenticate().await?;
        }

        match self.send_once(method.clone(), path, query, body).await {
            Err(e) if e.is_auth() && had_token => {
                tracing::warn!(path, "Webull session rejected, re-authenticating once");
                self.authenticate().await?;
                self.send_once(method, path, query, body).await
            }
            other => other,
        }
    }

    fn account_query(&self) -> Vec<(&'static str, String)> {
        vec![("account_id", self.config.account_id.clone())]
    }

    async fn submit_order(&self, order: Value) -> BrokerResult<String> {
        self.rate_limiter.until_ready().await;

        let client_order_id = order["client_order_id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_default();
        let body = json!({
            "account_id": self.config.account_id,
            "stock_order": order,
        });
        let response = self
            .call(Method::POST, "/trade/order/place", &[], Some(&body))
            .await?;

        // Some gateway versions echo nothing useful; our client id still identifies the order
        Ok(order_id_from(response).unwrap_or(client_order_id))
    }
}

fn order_id_from(response: Value) -> Option<String> {
    shape::string(
        &shape::unwrap_envelope(response),
        &["client_order_id", "order_id", "orderId", "id"],
    )
}

fn parse_side(raw: &str) -> Option<OrderSide> {
    let upper = raw.trim().to_ascii_uppercase();
    if upper.starts_with("BUY") {
        Some(OrderSide::Buy)
    } else if upper.starts_with("SELL") {
        Some(OrderSide::Sell)
    } else {
        None
    }
}

/// Normalize one raw position record; `None` if a required field is missing
pub(crate) fn parse_position(record: &Value) -> Option<BrokerPosition> {
    let symbol = shape::symbol(record)?;
    let entry_price = shape::number(
        record,
        &["avg_price", "avgPrice", "cost_price", "costPrice", "average_cost"],
    )?;
    let mut signed_qty = shape::number(record, &["quantity", "qty", "position"])?;

    // Some payloads report an unsigned quantity with an explicit side
    if let Some(side) = shape::string(record, &["side", "position_side", "positionSide"]) {
        if side.eq_ignore_ascii_case("short") && signed_qty > 0.0 {
            signed_qty = -signed_qty;
        }
    }

    Some(BrokerPosition {
        symbol,
        entry_price,
        signed_qty,
        order_ref: shape::string(record, &["stop_order_id", "order_id", "orderId"]),
    })
}

/// Normalize one raw order record; `None` if a required field is missing
pub(crate) fn parse_order(record: &Value) -> Option<BrokerOrder> {
    let order_id = shape::string(record, &["client_order_id", "order_id", "orderId", "id"])?;
    let symbol = shape::symbol(record)?;
    let side = shape::string(record, &["side", "order_side", "action"])
        .as_deref()
        .and_then(parse_side)?;
    let status = shape::string(record, &["status", "order_status", "statusStr"])
        .map(|s| OrderStatus::parse(&s))
        .unwrap_or(OrderStatus::Working);
    let order_type = shape::string(record, &["order_type", "orderType", "type"])
        .map(|s| OrderType::parse(&s))
        .unwrap_or(OrderType::Other);
    let quantity = shape::number(record, &["qty", "quantity", "total_quantity", "totalQuantity"])
        .map(|q| q.abs() as u64)
        .unwrap_or(0);

    Some(BrokerOrder {
        order_id,
        symbol,
        side,
        status,
        order_type,
        stop_price: shape::number(record, &["stop_price", "stopPrice", "auxPrice"]),
        quantity,
    })
}

/// Flatten combo orders (`{"orders": [...]}`) and drop terminal entries
pub(crate) fn active_orders_from(response: Value) -> Vec<BrokerOrder> {
    let mut orders = Vec::new();
    for record in shape::into_records(response) {
        let children = match record.get("orders") {
            Some(Value::Array(children)) => children.clone(),
            _ => vec![record],
        };
        for child in children {
            match parse_order(&child) {
                Some(order) if !order.status.is_terminal() => orders.push(order),
                Some(_) => {}
                None => tracing::warn!(record = %child, "Skipping order with missing fields"),
            }
        }
    }
    orders
}

#[async_trait]
impl BrokerGateway for WebullClient {
    async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        let response = self
            .call(Method::GET, "/account/positions", &self.account_query(), None)
            .await?;

        let mut positions = Vec::new();
        for record in shape::into_records(response) {
            match parse_position(&record) {
                Some(position) => positions.push(position),
                None => tracing::warn!(record = %record, "Skipping position with missing fields"),
            }
        }
        Ok(positions)
    }

    async fn get_active_orders(&self) -> BrokerResult<Vec<BrokerOrder>> {
        let mut query = self.account_query();
        query.push(("page_size", "100".to_string()));
        let response = self
            .call(Method::GET, "/trade/orders/list-open", &query, None)
            .await?;
        Ok(active_orders_from(response))
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<bool> {
        let body = json!({
            "account_id": self.config.account_id,
            "client_order_id": order_id,
        });
        match self
            .call(Method::POST, "/trade/order/cancel", &[], Some(&body))
            .await
        {
            Ok(_) => Ok(true),
            // Already gone (filled or cancelled elsewhere)
            Err(BrokerError::Status { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        qty: u64,
        stop_price: f64,
        side: OrderSide,
    ) -> BrokerResult<String> {
        self.submit_order(json!({
            "client_order_id": Uuid::new_v4().simple().to_string(),
            "symbol": symbol,
            "instrument_type": "EQUITY",
            "market": "US",
            "side": side.as_str(),
            "order_type": "STOP_LOSS",
            "qty": qty.to_string(),
            "stop_price": format!("{:.2}", round_cents(stop_price)),
            "time_in_force": "DAY",
            "extended_hours_trading": false,
        }))
        .await
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        qty: u64,
        side: OrderSide,
    ) -> BrokerResult<String> {
        self.submit_order(json!({
            "client_order_id": Uuid::new_v4().simple().to_string(),
            "symbol": symbol,
            "instrument_type": "EQUITY",
            "market": "US",
            "side": side.as_str(),
            "order_type": "MARKET",
            "qty": qty.to_string(),
            "time_in_force": "DAY",
            "extended_hours_trading": false,
        }))
        .await
    }

    async fn place_bracket_order(&self, order: &BracketOrder) -> BrokerResult<String> {
        let exit_side = match order.side {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        };
        self.submit_order(json!({
            "client_order_id": Uuid::new_v4().simple().to_string(),
            "symbol": order.symbol,
            "instrument_type": "EQUITY",
            "market": "US",
            "side": order.side.as_str(),
            "order_type": "LIMIT",
            "qty": order.quantity.to_string(),
            "limit_price": format!("{:.2}", round_cents(order.limit_price)),
            "time_in_force": "DAY",
            "extended_hours_trading": order.extended_hours,
            "attached_orders": [
                {
                    "side": exit_side.as_str(),
                    "order_type": "LIMIT",
                    "limit_price": format!("{:.2}", round_cents(order.take_profit)),
                },
                {
                    "side": exit_side.as_str(),
                    "order_type": "STOP_LOSS",
                    "stop_price": format!("{:.2}", round_cents(order.stop_loss)),
                },
            ],
        }))
        .await
    }

    async fn modify_stop(&self, order_id: &str, new_stop_price: f64) -> BrokerResult<String> {
        let body = json!({
            "account_id": self.config.account_id,
            "stock_order": {
                "client_order_id": order_id,
                "stop_price": format!("{:.2}", round_cents(new_stop_price)),
            },
        });
        match self
            .call(Method::POST, "/trade/order/replace", &[], Some(&body))
            .await
        {
            Ok(response) => Ok(order_id_from(response).unwrap_or_else(|| order_id.to_string())),
            Err(BrokerError::Status { status, .. })
                if status == 404 || status == 405 || status == 501 =>
            {
                Err(BrokerError::Unsupported("modify_stop"))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl QuoteSource for WebullClient {
    fn name(&self) -> &'static str {
        "webull"
    }

    async fn get_quote(&self, symbol: &str) -> BrokerResult<Quote> {
        let query = [
            ("symbols", symbol.to_string()),
            ("category", "US_STOCK".to_string()),
        ];
        let response = self
            .call(Method::GET, "/market-data/snapshot", &query, None)
            .await?;

        let record = shape::into_records(response)
            .into_iter()
            .next()
            .ok_or_else(|| BrokerError::Shape(format!("no snapshot for {}", symbol)))?;
        let bid = shape::number(&record, &["bid", "bid_price", "bidPrice"]);
        let ask = shape::number(&record, &["ask", "ask_price", "askPrice"]);
        match (bid, ask) {
            (None, None) => Err(BrokerError::Shape(format!("snapshot for {} has no bid/ask", symbol))),
            (bid, ask) => Ok(Quote::new(bid.unwrap_or(0.0), ask.unwrap_or(0.0))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_position_variants() {
        let record = json!({"symbol": "aapl", "avgPrice": "187.25", "qty": "100"});
        let position = parse_position(&record).unwrap();
        assert_eq!(position.symbol, "AAPL");
        assert_eq!(position.entry_price, 187.25);
        assert_eq!(position.signed_qty, 100.0);
        assert_eq!(position.order_ref, None);

        let short = json!({
            "ticker": {"symbol": "TSLA"},
            "cost_price": 250.0,
            "quantity": 20,
            "side": "SHORT",
            "order_id": "SL-9"
        });
        let position = parse_position(&short).unwrap();
        assert_eq!(position.signed_qty, -20.0);
        assert_eq!(position.order_ref.as_deref(), Some("SL-9"));
    }

    #[test]
    fn test_parse_position_missing_price_is_skipped() {
        let record = json!({"symbol": "AAPL", "qty": 10});
        assert!(parse_position(&record).is_none());
    }

    #[test]
    fn test_active_orders_drop_terminal_and_flatten_combos() {
        let response = json!({"data": [
            {"client_order_id": "a1", "symbol": "AAPL", "side": "SELL",
             "status": "SUBMITTED", "order_type": "STOP_LOSS", "stop_price": "97.50", "qty": "10"},
            {"client_order_id": "a2", "symbol": "AAPL", "side": "BUY",
             "status": "FILLED", "order_type": "LIMIT", "qty": "10"},
            {"combo_type": "OTOCO", "orders": [
                {"client_order_id": "c1", "symbol": "NVDA", "side": "BUY",
                 "status": "WORKING", "order_type": "LIMIT", "qty": 5},
                {"client_order_id": "c2", "symbol": "NVDA", "side": "SELL",
                 "status": "CANCELLED", "order_type": "STOP_LOSS", "qty": 5}
            ]},
            {"symbol": "BROKEN"}
        ]});

        let orders = active_orders_from(response);
        let ids: Vec<&str> = orders.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "c1"]);
        assert_eq!(orders[0].order_type, OrderType::Stop);
        assert_eq!(orders[0].stop_price, Some(97.5));
        assert_eq!(orders[0].quantity, 10);
    }

    #[test]
    fn test_parse_side() {
        assert_eq!(parse_side("BUY_TO_COVER"), Some(OrderSide::Buy));
        assert_eq!(parse_side("sell"), Some(OrderSide::Sell));
        assert_eq!(parse_side("HOLD"), None);
    }
}
