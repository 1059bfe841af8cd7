use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::api::{round_cents, BrokerGateway, HaltFeed};
use crate::execution::position_tracker::Position;
use crate::models::Side;

/// Halt state of one symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HaltRecord {
    pub is_halted: bool,
    /// Set when trading resumed; cleared once the protective order is handled
    pub unhalted_at: Option<DateTime<Utc>>,
}

/// Symbols that changed state in one poll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HaltTransitions {
    pub halted: Vec<String>,
    pub resumed: Vec<String>,
}

impl HaltTransitions {
    pub fn is_empty(&self) -> bool {
        self.halted.is_empty() && self.resumed.is_empty()
    }
}

/// Tracks trading halts and reacts to them.
///
/// A new halt cancels every resting order of that symbol. A resume arms a
/// one-shot protective stop that may fire within `resume_window` of the
/// resume time.
pub struct HaltMonitor {
    records: HashMap<String, HaltRecord>,
    poll_interval: Duration,
    resume_window: Duration,
    resume_stop_offset_pct: f64,
    last_poll: Option<DateTime<Utc>>,
}

impl HaltMonitor {
    pub fn new(poll_interval: Duration, resume_window: Duration, resume_stop_offset_pct: f64) -> Self {
        Self {
            records: HashMap::new(),
            poll_interval,
            resume_window,
            resume_stop_offset_pct,
            last_poll: None,
        }
    }

    pub fn record(&self, symbol: &str) -> Option<&HaltRecord> {
        self.records.get(symbol)
    }

    pub fn is_halted(&self, symbol: &str) -> bool {
        self.records.get(symbol).is_some_and(|r| r.is_halted)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_poll {
            Some(last) => now - last >= self.poll_interval,
            None => true,
        }
    }

    /// Fold one feed observation into the records
    pub fn apply(&mut self, halted_now: &HashSet<String>, now: DateTime<Utc>) -> HaltTransitions {
        let mut transitions = HaltTransitions::default();

        for symbol in halted_now {
            let record = self.records.entry(symbol.clone()).or_default();
            if !record.is_halted {
                record.is_halted = true;
                record.unhalted_at = None;
                transitions.halted.push(symbol.clone());
            }
        }

        for (symbol, record) in self.records.iter_mut() {
            if record.is_halted && !halted_now.contains(symbol) {
                record.is_halted = false;
                record.unhalted_at = Some(now);
                transitions.resumed.push(symbol.clone());
            }
        }

        transitions.halted.sort();
        transitions.resumed.sort();
        transitions
    }

    /// Poll the feed and cancel resting orders of newly halted symbols.
    ///
    /// A feed failure counts as "nothing observed": no transitions are recorded.
    pub async fn poll(
        &mut self,
        feed: &dyn HaltFeed,
        broker: &dyn BrokerGateway,
        now: DateTime<Utc>,
    ) -> HaltTransitions {
        self.last_poll = Some(now);

        let halted_now = match feed.fetch_halted_symbols().await {
            Ok(halted) => halted,
            Err(e) => {
                tracing::warn!("Halt feed unavailable, skipping this cycle: {}", e);
                return HaltTransitions::default();
            }
        };

        let transitions = self.apply(&halted_now, now);
        for symbol in &transitions.halted {
            tracing::warn!("⏸️  {} halted", symbol);
        }
        for symbol in &transitions.resumed {
            tracing::info!("▶️  {} resumed, protective stop armed", symbol);
        }

        if !transitions.halted.is_empty() {
            cancel_symbol_orders(broker, &transitions.halted).await;
        }
        transitions
    }

    pub async fn poll_if_due(
        &mut self,
        feed: &dyn HaltFeed,
        broker: &dyn BrokerGateway,
        now: DateTime<Utc>,
    ) -> Option<HaltTransitions> {
        if !self.is_due(now) {
            return None;
        }
        Some(self.poll(feed, broker, now).await)
    }

    /// Consume the resume eligibility of `symbol`.
    ///
    /// True only within the resume window. The eligibility is cleared either
    /// way, so each resume fires at most once.
    pub fn take_resume_eligibility(&mut self, symbol: &str, now: DateTime<Utc>) -> bool {
        let Some(record) = self.records.get_mut(symbol) else {
            return false;
        };
        match record.unhalted_at.take() {
            Some(at) => {
                let within = now >= at && now - at <= self.resume_window;
                if !within {
                    tracing::debug!("{} resume window expired", symbol);
                }
                within
            }
            None => false,
        }
    }

    pub fn resume_stop_price(&self, side: Side, price: f64) -> f64 {
        match side {
            Side::Long => price * (1.0 - self.resume_stop_offset_pct),
            Side::Short => price * (1.0 + self.resume_stop_offset_pct),
        }
    }

    /// Place the one-shot protective stop for a freshly resumed symbol
    pub async fn protect_after_resume(
        &mut self,
        broker: &dyn BrokerGateway,
        position: &mut Position,
        price: f64,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if !self.take_resume_eligibility(&position.symbol, now) {
            return None;
        }

        let stop = round_cents(self.resume_stop_price(position.side, price));
        let side = position.side.closing_order_side();
        match broker
            .place_stop_order(&position.symbol, position.quantity, stop, side)
            .await
        {
            Ok(order_id) => {
                tracing::info!(
                    symbol = %position.symbol,
                    stop,
                    qty = position.quantity,
                    order_id = %order_id,
                    "Post-resume protective stop placed"
                );
                position.order_ref = Some(order_id.clone());
                // A looser resume stop still gets pulled up to `stop_loss`
                let covers = match position.side {
                    Side::Long => stop >= round_cents(position.stop_loss),
                    Side::Short => stop <= round_cents(position.stop_loss),
                };
                if covers {
                    position.stop_sync_pending = false;
                }
                Some(order_id)
            }
            Err(e) => {
                tracing::warn!("Post-resume stop for {} failed: {}", position.symbol, e);
                None
            }
        }
    }
}

/// Cancel every resting order for `symbols` (and no other). Returns the
/// cancelled order ids.
pub async fn cancel_symbol_orders(broker: &dyn BrokerGateway, symbols: &[String]) -> Vec<String> {
    let orders = match broker.get_active_orders().await {
        Ok(orders) => orders,
        Err(e) => {
            tracing::warn!("Could not list orders to cancel for halted symbols: {}", e);
            return Vec::new();
        }
    };

    let mut cancelled = Vec::new();
    for order in orders.iter().filter(|o| symbols.contains(&o.symbol)) {
        match broker.cancel_order(&order.order_id).await {
            Ok(_) => {
                tracing::info!("Cancelled {} #{} on halt", order.symbol, order.order_id);
                cancelled.push(order.order_id.clone());
            }
            Err(e) => tracing::warn!("Cancel of {} #{} failed: {}", order.symbol, order.order_id, e),
        }
    }
    cancelled
}
