//! Trailing exit rules.
//!
//! Two decisions run on every price refresh: the stop ratchet (breakeven at
//! half the take-profit target, half the target once the full target is
//! touched) and the once-a-day partial take-profit. The pure parts decide;
//! [`ExitEngine`] turns decisions into broker calls.

use crate::api::{round_cents, BrokerError, BrokerGateway, BrokerOrder, BrokerResult};
use crate::execution::position_tracker::Position;
use crate::models::Side;

/// Relative slack for threshold comparisons so 100 * 1.015 still counts as 101.5
const THRESHOLD_EPSILON: f64 = 1e-9;

fn eps(entry: f64) -> f64 {
    entry.abs() * THRESHOLD_EPSILON
}

/// Stop level the ratchet wants at `price`, or `None` when the current stop stays
pub fn trailing_stop_target(position: &Position, price: f64) -> Option<f64> {
    let entry = position.entry_price;
    let tp = position.take_profit_pct;
    let stop = position.stop_loss;
    let e = eps(entry);

    match position.side {
        Side::Long => {
            let full = entry * (1.0 + tp);
            let half = entry * (1.0 + tp / 2.0);
            if price >= full - e && stop < half - e {
                Some(half)
            } else if price >= half - e && stop < entry - e {
                Some(entry)
            } else {
                None
            }
        }
        Side::Short => {
            let full = entry * (1.0 - tp);
            let half = entry * (1.0 - tp / 2.0);
            if price <= full + e && stop > half + e {
                Some(half)
            } else if price <= half + e && stop > entry + e {
                Some(entry)
            } else {
                None
            }
        }
    }
}

/// Ratchet the stop in place. Returns the new stop when it moved and marks
/// the broker-side stop for re-sync.
pub fn update_trailing_stop(position: &mut Position, price: f64) -> Option<f64> {
    let new_stop = trailing_stop_target(position, price)?;
    tracing::info!(
        symbol = %position.symbol,
        side = %position.side,
        price,
        old_stop = position.stop_loss,
        new_stop,
        "Stop ratcheted"
    );
    position.stop_loss = new_stop;
    position.stop_sync_pending = true;
    Some(new_stop)
}

/// Shares to sell for the half-profit take, if it is due at `price`
pub fn partial_exit_quantity(position: &Position, price: f64) -> Option<u64> {
    if position.partial_exit_done || position.quantity <= 1 {
        return None;
    }
    let trigger = position.take_profit_pct * 100.0 / 2.0;
    if position.gain_pct(price) >= trigger - THRESHOLD_EPSILON {
        Some(position.quantity / 2)
    } else {
        None
    }
}

/// How the broker-side stop was brought in line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopSync {
    /// Matching stop already resting
    InPlace(String),
    Modified(String),
    Replaced(String),
    Placed(String),
}

impl StopSync {
    pub fn order_id(&self) -> &str {
        match self {
            StopSync::InPlace(id)
            | StopSync::Modified(id)
            | StopSync::Replaced(id)
            | StopSync::Placed(id) => id,
        }
    }
}

pub struct ExitEngine {
    stop_tolerance: f64,
}

impl ExitEngine {
    pub fn new(stop_tolerance: f64) -> Self {
        Self { stop_tolerance }
    }

    /// Sell half at market once the gain reaches half the target
    pub async fn maybe_take_half(
        &self,
        broker: &dyn BrokerGateway,
        position: &mut Position,
        price: f64,
    ) -> bool {
        let Some(qty) = partial_exit_quantity(position, price) else {
            return false;
        };

        let side = position.side.closing_order_side();
        match broker.place_market_order(&position.symbol, qty, side).await {
            Ok(order_id) => {
                position.quantity = position.quantity.saturating_sub(qty);
                position.partial_exit_done = true;
                position.stop_sync_pending = true;
                tracing::info!(
                    symbol = %position.symbol,
                    qty,
                    remaining = position.quantity,
                    price,
                    order_id = %order_id,
                    "Partial take-profit executed"
                );
                true
            }
            Err(e) => {
                tracing::warn!("Partial exit for {} failed: {}", position.symbol, e);
                false
            }
        }
    }

    fn find_stop<'a>(&self, orders: &'a [BrokerOrder], position: &Position) -> Option<&'a BrokerOrder> {
        let closing = position.side.closing_order_side();
        let mut stops = orders.iter().filter(|o| {
            o.symbol == position.symbol && o.side == closing && o.order_type.is_stop()
        });

        match &position.order_ref {
            Some(order_ref) => {
                let candidates: Vec<&BrokerOrder> = stops.collect();
                candidates
                    .iter()
                    .find(|o| &o.order_id == order_ref)
                    .or_else(|| candidates.first())
                    .copied()
            }
            None => stops.next(),
        }
    }

    /// Bring the broker's protective stop in line with the position.
    ///
    /// On success `order_ref` points at the resting stop and the pending flag
    /// is cleared; on failure both are left alone so the next iteration retries.
    pub async fn sync_stop(
        &self,
        broker: &dyn BrokerGateway,
        position: &mut Position,
    ) -> BrokerResult<StopSync> {
        let target = round_cents(position.stop_loss);
        let side = position.side.closing_order_side();
        let orders = broker.get_active_orders().await?;

        let outcome = match self.find_stop(&orders, position) {
            Some(existing) => {
                let price_ok = existing
                    .stop_price
                    .is_some_and(|p| (p - target).abs() <= self.stop_tolerance);
                let qty_ok = existing.quantity == position.quantity;

                if price_ok && qty_ok {
                    StopSync::InPlace(existing.order_id.clone())
                } else {
                    let modified = if qty_ok {
                        match broker.modify_stop(&existing.order_id, target).await {
                            Ok(id) => Some(id),
                            Err(BrokerError::Unsupported(_)) => None,
                            Err(e) => return Err(e),
                        }
                    } else {
                        None
                    };

                    match modified {
                        Some(id) => StopSync::Modified(id),
                        None => {
                            if !broker.cancel_order(&existing.order_id).await? {
                                tracing::debug!("Stop {} already gone", existing.order_id);
                            }
                            let id = broker
                                .place_stop_order(&position.symbol, position.quantity, target, side)
                                .await?;
                            StopSync::Replaced(id)
                        }
                    }
                }
            }
            None => {
                let id = broker
                    .place_stop_order(&position.symbol, position.quantity, target, side)
                    .await?;
                StopSync::Placed(id)
            }
        };

        if !matches!(outcome, StopSync::InPlace(_)) {
            tracing::info!(
                symbol = %position.symbol,
                stop = target,
                qty = position.quantity,
                outcome = ?outcome,
                "Protective stop synced"
            );
        }
        position.order_ref = Some(outcome.order_id().to_string());
        position.stop_sync_pending = false;
        Ok(outcome)
    }
}
