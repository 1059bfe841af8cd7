// Day-end flattening of every open position
use chrono::{DateTime, Utc};

use crate::api::{BrokerGateway, BrokerResult};
use crate::calendar::TradingCalendar;
use crate::journal::TradeJournal;
use crate::models::{OrderSide, Side};
use crate::notify::Notifier;

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub symbol: String,
    pub quantity: u64,
    pub side: OrderSide,
    /// `None` in dry-run mode or when the order was rejected
    pub order_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct CloseReport {
    pub closed: Vec<ClosedPosition>,
    pub cancelled_orders: usize,
}

/// Cancel every resting order, then market-close every open position.
///
/// The cancel sweep runs before any close, so working close orders are never
/// swept. The position listing is the only fatal failure; per-symbol failures
/// are logged and reported so the remaining positions still get closed.
pub async fn force_close_all(
    broker: &dyn BrokerGateway,
    notifier: &dyn Notifier,
    journal: &TradeJournal,
    calendar: &TradingCalendar,
    now: DateTime<Utc>,
    dry_run: bool,
) -> BrokerResult<CloseReport> {
    let positions = broker.get_positions().await?;
    let session = calendar.session_date(now);
    let mut report = CloseReport::default();

    if !dry_run {
        report.cancelled_orders = cancel_resting_orders(broker).await;
    }

    for position in &positions {
        let Some(side) = Side::from_signed_qty(position.signed_qty) else {
            continue;
        };
        let quantity = position.signed_qty.abs().round() as u64;
        if quantity == 0 {
            continue;
        }
        let order_side = side.closing_order_side();

        if dry_run {
            tracing::info!("[DRY-RUN] would {} {} x{} at market", order_side, position.symbol, quantity);
            report.closed.push(ClosedPosition {
                symbol: position.symbol.clone(),
                quantity,
                side: order_side,
                order_id: None,
            });
            continue;
        }

        let order_id = match broker
            .place_market_order(&position.symbol, quantity, order_side)
            .await
        {
            Ok(order_id) => {
                notifier.notify(&format!(
                    "Pre-close market order: {} {} x{} order={}",
                    order_side, position.symbol, quantity, order_id
                ));
                journal.record_close(
                    now,
                    session,
                    &position.symbol,
                    quantity,
                    order_side.as_str(),
                    &order_id,
                );
                Some(order_id)
            }
            Err(e) => {
                tracing::error!("Failed to close {}: {}", position.symbol, e);
                notifier.notify(&format!("⚠️ Close of {} failed: {}", position.symbol, e));
                None
            }
        };

        report.closed.push(ClosedPosition {
            symbol: position.symbol.clone(),
            quantity,
            side: order_side,
            order_id,
        });
    }

    tracing::info!(
        "Closed {} positions; {} open orders cancelled",
        report.closed.iter().filter(|c| c.order_id.is_some()).count(),
        report.cancelled_orders
    );
    Ok(report)
}

async fn cancel_resting_orders(broker: &dyn BrokerGateway) -> usize {
    let orders = match broker.get_active_orders().await {
        Ok(orders) => orders,
        Err(e) => {
            tracing::warn!("Could not list open orders to cancel: {}", e);
            return 0;
        }
    };

    let mut cancelled = 0;
    for order in &orders {
        match broker.cancel_order(&order.order_id).await {
            Ok(_) => cancelled += 1,
            Err(e) => tracing::warn!("Cancel of #{} failed: {}", order.order_id, e),
        }
    }
    cancelled
}
