// In-memory collaborators for unit tests
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::api::{
    BracketOrder, BrokerError, BrokerGateway, BrokerOrder, BrokerPosition, BrokerResult,
    HaltFeed, OrderStatus, OrderType, QuoteSource,
};
use crate::models::{OrderSide, Quote};
use crate::notify::Notifier;

/// Write operations observed by the mock broker
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerCall {
    Cancel(String),
    PlaceStop {
        symbol: String,
        qty: u64,
        stop_price: f64,
        side: OrderSide,
    },
    PlaceMarket {
        symbol: String,
        qty: u64,
        side: OrderSide,
    },
    PlaceBracket(BracketOrder),
    ModifyStop {
        order_id: String,
        stop_price: f64,
    },
}

#[derive(Default)]
struct MockState {
    positions: Vec<BrokerPosition>,
    orders: Vec<BrokerOrder>,
    calls: Vec<BrokerCall>,
    next_id: u64,
    supports_modify: bool,
    resting_market_orders: bool,
    fail_positions: bool,
    fail_orders: bool,
    fail_writes: bool,
}

/// Broker double that keeps a live order book and logs every write
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modify_support(self) -> Self {
        self.state.lock().unwrap().supports_modify = true;
        self
    }

    /// Market orders stay working in the book instead of filling instantly
    pub fn with_resting_market_orders(self) -> Self {
        self.state.lock().unwrap().resting_market_orders = true;
        self
    }

    pub fn add_position(&self, symbol: &str, entry_price: f64, signed_qty: f64) {
        self.state.lock().unwrap().positions.push(BrokerPosition {
            symbol: symbol.to_string(),
            entry_price,
            signed_qty,
            order_ref: None,
        });
    }

    pub fn add_order(&self, order: BrokerOrder) {
        self.state.lock().unwrap().orders.push(order);
    }

    pub fn set_fail_positions(&self, fail: bool) {
        self.state.lock().unwrap().fail_positions = fail;
    }

    pub fn set_fail_orders(&self, fail: bool) {
        self.state.lock().unwrap().fail_orders = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn orders(&self) -> Vec<BrokerOrder> {
        self.state.lock().unwrap().orders.clone()
    }

    fn write(&self, call: BrokerCall) -> BrokerResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(BrokerError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        state.calls.push(call);
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }
}

pub fn stop_order(id: &str, symbol: &str, side: OrderSide, stop_price: f64, qty: u64) -> BrokerOrder {
    BrokerOrder {
        order_id: id.to_string(),
        symbol: symbol.to_string(),
        side,
        status: OrderStatus::Working,
        order_type: OrderType::Stop,
        stop_price: Some(stop_price),
        quantity: qty,
    }
}

pub fn limit_order(id: &str, symbol: &str, side: OrderSide, qty: u64) -> BrokerOrder {
    BrokerOrder {
        order_id: id.to_string(),
        symbol: symbol.to_string(),
        side,
        status: OrderStatus::Working,
        order_type: OrderType::Limit,
        stop_price: None,
        quantity: qty,
    }
}

#[async_trait]
impl BrokerGateway for MockBroker {
    async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        let state = self.state.lock().unwrap();
        if state.fail_positions {
            return Err(BrokerError::Status {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        Ok(state.positions.clone())
    }

    async fn get_active_orders(&self) -> BrokerResult<Vec<BrokerOrder>> {
        let state = self.state.lock().unwrap();
        if state.fail_orders {
            return Err(BrokerError::Status {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        Ok(state.orders.clone())
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<bool> {
        self.write(BrokerCall::Cancel(order_id.to_string()))?;
        let mut state = self.state.lock().unwrap();
        let before = state.orders.len();
        state.orders.retain(|o| o.order_id != order_id);
        Ok(state.orders.len() != before)
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        qty: u64,
        stop_price: f64,
        side: OrderSide,
    ) -> BrokerResult<String> {
        self.write(BrokerCall::PlaceStop {
            symbol: symbol.to_string(),
            qty,
            stop_price,
            side,
        })?;
        let id = self.next_id("stop");
        self.add_order(stop_order(&id, symbol, side, stop_price, qty));
        Ok(id)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        qty: u64,
        side: OrderSide,
    ) -> BrokerResult<String> {
        self.write(BrokerCall::PlaceMarket {
            symbol: symbol.to_string(),
            qty,
            side,
        })?;
        let id = self.next_id("mkt");
        if self.state.lock().unwrap().resting_market_orders {
            self.add_order(BrokerOrder {
                order_id: id.clone(),
                symbol: symbol.to_string(),
                side,
                status: OrderStatus::Working,
                order_type: OrderType::Market,
                stop_price: None,
                quantity: qty,
            });
        }
        Ok(id)
    }

    async fn place_bracket_order(&self, order: &BracketOrder) -> BrokerResult<String> {
        self.write(BrokerCall::PlaceBracket(order.clone()))?;
        let id = self.next_id("entry");
        self.add_order(limit_order(&id, &order.symbol, order.side, order.quantity));
        Ok(id)
    }

    async fn modify_stop(&self, order_id: &str, new_stop_price: f64) -> BrokerResult<String> {
        if !self.state.lock().unwrap().supports_modify {
            return Err(BrokerError::Unsupported("modify_stop"));
        }
        self.write(BrokerCall::ModifyStop {
            order_id: order_id.to_string(),
            stop_price: new_stop_price,
        })?;
        let mut state = self.state.lock().unwrap();
        if let Some(order) = state.orders.iter_mut().find(|o| o.order_id == order_id) {
            order.stop_price = Some(new_stop_price);
        }
        Ok(order_id.to_string())
    }
}

/// Quotes keyed by symbol; unknown symbols fail
#[derive(Clone, Default)]
pub struct MockQuotes {
    quotes: Arc<Mutex<HashMap<String, Quote>>>,
}

impl MockQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.set_quote(symbol, Quote::new(price, price));
    }

    pub fn set_quote(&self, symbol: &str, quote: Quote) {
        self.quotes.lock().unwrap().insert(symbol.to_string(), quote);
    }
}

#[async_trait]
impl QuoteSource for MockQuotes {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_quote(&self, symbol: &str) -> BrokerResult<Quote> {
        self.quotes
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError::Shape(format!("no quote for {}", symbol)))
    }
}

/// Halt feed returning a settable symbol list, or failing on demand
#[derive(Clone, Default)]
pub struct MockHaltFeed {
    halted: Arc<Mutex<HashSet<String>>>,
    failing: Arc<Mutex<bool>>,
    fetches: Arc<Mutex<usize>>,
}

impl MockHaltFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_halted(&self, symbols: &[&str]) {
        *self.halted.lock().unwrap() = symbols.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl HaltFeed for MockHaltFeed {
    async fn fetch_halted_symbols(&self) -> BrokerResult<HashSet<String>> {
        *self.fetches.lock().unwrap() += 1;
        if *self.failing.lock().unwrap() {
            return Err(BrokerError::Status {
                status: 500,
                body: "feed down".into(),
            });
        }
        Ok(self.halted.lock().unwrap().clone())
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
