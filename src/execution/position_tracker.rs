use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::api::BrokerPosition;
use crate::models::Side;

/// One open brokerage position under active management
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub entry_price: f64,
    pub side: Side,
    pub quantity: u64,
    pub stop_loss: f64,
    pub take_profit_pct: f64,
    pub partial_exit_done: bool,
    /// Broker id of the protective stop order
    pub order_ref: Option<String>,
    /// Broker-side stop lags `stop_loss` or `quantity`
    pub stop_sync_pending: bool,
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        entry_price: f64,
        quantity: u64,
        take_profit_pct: f64,
        initial_stop_pct: f64,
    ) -> Self {
        let stop_loss = match side {
            Side::Long => entry_price * (1.0 - initial_stop_pct),
            Side::Short => entry_price * (1.0 + initial_stop_pct),
        };

        Self {
            symbol: symbol.into(),
            entry_price,
            side,
            quantity,
            stop_loss,
            take_profit_pct,
            partial_exit_done: false,
            order_ref: None,
            stop_sync_pending: false,
        }
    }

    /// Gain since entry in percent, positive when the trade is working
    pub fn gain_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.side.sign() * (price - self.entry_price) / self.entry_price * 100.0
    }

    pub fn is_closed(&self) -> bool {
        self.quantity == 0
    }
}

/// In-memory set of managed positions, keyed by symbol
#[derive(Debug, Default)]
pub struct PositionTracker {
    positions: BTreeMap<String, Position>,
    take_profit_pct: f64,
    initial_stop_pct: f64,
    session_date: Option<NaiveDate>,
}

impl PositionTracker {
    pub fn new(take_profit_pct: f64, initial_stop_pct: f64) -> Self {
        Self {
            positions: BTreeMap::new(),
            take_profit_pct,
            initial_stop_pct,
            session_date: None,
        }
    }

    /// Replace the managed set with a broker snapshot.
    ///
    /// Flat positions (zero quantity) are skipped. Returns the number of
    /// positions now under management.
    pub fn initialize(&mut self, broker_positions: &[BrokerPosition]) -> usize {
        self.positions.clear();

        for bp in broker_positions {
            let Some(side) = Side::from_signed_qty(bp.signed_qty) else {
                tracing::debug!("Skipping flat position {}", bp.symbol);
                continue;
            };
            let quantity = bp.signed_qty.abs().round() as u64;
            if quantity == 0 {
                continue;
            }

            let mut position = Position::new(
                bp.symbol.clone(),
                side,
                bp.entry_price,
                quantity,
                self.take_profit_pct,
                self.initial_stop_pct,
            );
            position.order_ref = bp.order_ref.clone();

            tracing::info!(
                "Tracking {} {} x{} @ ${:.2} (SL ${:.2})",
                side,
                position.symbol,
                quantity,
                position.entry_price,
                position.stop_loss
            );
            self.positions.insert(position.symbol.clone(), position);
        }

        self.positions.len()
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    pub fn insert(&mut self, position: Position) {
        self.positions.insert(position.symbol.clone(), position);
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Evict the position once its quantity reached zero
    pub fn remove_if_closed(&mut self, symbol: &str) -> bool {
        let closed = self.positions.get(symbol).is_some_and(Position::is_closed);
        if closed {
            self.positions.remove(symbol);
            tracing::info!("{} fully exited, no longer tracked", symbol);
        }
        closed
    }

    /// Flag every broker-side stop as needing re-placement
    pub fn mark_all_for_stop_sync(&mut self) {
        for position in self.positions.values_mut() {
            position.stop_sync_pending = true;
        }
    }

    /// Clear every partial-exit flag when the exchange date moves on.
    ///
    /// The first call only records the date. Returns true on a rollover.
    pub fn roll_session(&mut self, date: NaiveDate) -> bool {
        match self.session_date {
            Some(current) if current == date => false,
            Some(current) => {
                for position in self.positions.values_mut() {
                    position.partial_exit_done = false;
                }
                self.session_date = Some(date);
                tracing::info!("Session rolled {} -> {}, partial exits re-armed", current, date);
                true
            }
            None => {
                self.session_date = Some(date);
                false
            }
        }
    }

    pub fn session_date(&self) -> Option<NaiveDate> {
        self.session_date
    }
}
