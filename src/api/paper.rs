use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

use super::broker::{
    BracketOrder, BrokerError, BrokerGateway, BrokerOrder, BrokerPosition, BrokerResult,
    OrderStatus, OrderType,
};
use crate::models::OrderSide;

#[derive(Default)]
struct PaperBook {
    orders: Vec<BrokerOrder>,
    suppressed: HashSet<String>,
    market_fills: Vec<(String, u64, OrderSide)>,
}

/// Runs every decision against real account data but never sends a write.
///
/// Reads pass through to the wrapped gateway. Placements land in an
/// in-memory book with `paper-` ids, and cancels of real orders only hide
/// them from later reads, so the rest of the loop behaves as if they worked.
pub struct PaperBroker<B> {
    inner: B,
    book: Mutex<PaperBook>,
}

impl<B: BrokerGateway> PaperBroker<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            book: Mutex::new(PaperBook::default()),
        }
    }

    /// Resting simulated orders
    pub fn paper_orders(&self) -> Vec<BrokerOrder> {
        self.book
            .lock()
            .map(|book| book.orders.clone())
            .unwrap_or_default()
    }

    /// Simulated market executions as (symbol, qty, side)
    pub fn market_fills(&self) -> Vec<(String, u64, OrderSide)> {
        self.book
            .lock()
            .map(|book| book.market_fills.clone())
            .unwrap_or_default()
    }

    fn record(&self, order: BrokerOrder) -> BrokerResult<String> {
        let id = order.order_id.clone();
        let mut book = self
            .book
            .lock()
            .map_err(|_| BrokerError::Shape("paper book poisoned".into()))?;
        book.orders.push(order);
        Ok(id)
    }
}

fn paper_id() -> String {
    format!("paper-{}", Uuid::new_v4().simple())
}

#[async_trait]
impl<B: BrokerGateway> BrokerGateway for PaperBroker<B> {
    async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        self.inner.get_positions().await
    }

    async fn get_active_orders(&self) -> BrokerResult<Vec<BrokerOrder>> {
        let real = self.inner.get_active_orders().await?;
        let book = self
            .book
            .lock()
            .map_err(|_| BrokerError::Shape("paper book poisoned".into()))?;

        Ok(real
            .into_iter()
            .filter(|o| !book.suppressed.contains(&o.order_id))
            .chain(book.orders.iter().cloned())
            .collect())
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<bool> {
        let mut book = self
            .book
            .lock()
            .map_err(|_| BrokerError::Shape("paper book poisoned".into()))?;

        let before = book.orders.len();
        book.orders.retain(|o| o.order_id != order_id);
        if book.orders.len() == before {
            book.suppressed.insert(order_id.to_string());
        }
        tracing::info!(order_id, "[PAPER] cancel order");
        Ok(true)
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        qty: u64,
        stop_price: f64,
        side: OrderSide,
    ) -> BrokerResult<String> {
        tracing::info!(symbol, qty, stop_price, %side, "[PAPER] place stop order");
        self.record(BrokerOrder {
            order_id: paper_id(),
            symbol: symbol.to_string(),
            side,
            status: OrderStatus::Working,
            order_type: OrderType::Stop,
            stop_price: Some(stop_price),
            quantity: qty,
        })
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        qty: u64,
        side: OrderSide,
    ) -> BrokerResult<String> {
        tracing::info!(symbol, qty, %side, "[PAPER] place market order");
        let mut book = self
            .book
            .lock()
            .map_err(|_| BrokerError::Shape("paper book poisoned".into()))?;
        book.market_fills.push((symbol.to_string(), qty, side));
        Ok(paper_id())
    }

    async fn place_bracket_order(&self, order: &BracketOrder) -> BrokerResult<String> {
        tracing::info!(
            symbol = %order.symbol,
            qty = order.quantity,
            limit = order.limit_price,
            tp = order.take_profit,
            sl = order.stop_loss,
            "[PAPER] place bracket order"
        );
        self.record(BrokerOrder {
            order_id: paper_id(),
            symbol: order.symbol.clone(),
            side: order.side,
            status: OrderStatus::Working,
            order_type: OrderType::Limit,
            stop_price: None,
            quantity: order.quantity,
        })
    }

    async fn modify_stop(&self, order_id: &str, new_stop_price: f64) -> BrokerResult<String> {
        let mut book = self
            .book
            .lock()
            .map_err(|_| BrokerError::Shape("paper book poisoned".into()))?;

        // Real orders are left to the cancel/replace path
        let order = book
            .orders
            .iter_mut()
            .find(|o| o.order_id == order_id)
            .ok_or(BrokerError::Unsupported("modify_stop"))?;
        order.stop_price = Some(new_stop_price);
        tracing::info!(order_id, new_stop_price, "[PAPER] modify stop");
        Ok(order_id.to_string())
    }
}
