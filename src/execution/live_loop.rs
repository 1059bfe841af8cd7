//! Intraday monitoring loop.
//!
//! Every iteration runs, in order: session-end check, position snapshot
//! (until one succeeds), date rollover, the order-cancel cutoff, a halt poll
//! when due, then per-position exits. Each iteration finishes before the
//! next sleep, so no two exit decisions for a symbol ever overlap.

use chrono::{DateTime, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::api::{BrokerGateway, BrokerResult, HaltFeed, QuoteSource};
use crate::calendar::TradingCalendar;
use crate::config::Settings;
use crate::execution::exit_engine::{update_trailing_stop, ExitEngine};
use crate::execution::halt_monitor::HaltMonitor;
use crate::execution::position_tracker::PositionTracker;
use crate::journal::TradeJournal;
use crate::notify::Notifier;

/// Loop timing and exit parameters, resolved from settings
#[derive(Debug, Clone)]
pub struct LiveLoopConfig {
    pub cancel_deadline: NaiveTime,
    pub session_end: NaiveTime,
    pub poll_interval: Duration,
    pub take_profit_pct: f64,
    pub initial_stop_pct: f64,
    pub stop_tolerance: f64,
    pub halt_poll_interval: chrono::Duration,
    pub resume_window: chrono::Duration,
    pub resume_stop_offset_pct: f64,
}

impl LiveLoopConfig {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            cancel_deadline: settings.cancel_deadline()?,
            session_end: settings.session_end()?,
            poll_interval: Duration::from_secs(settings.session.poll_interval_secs),
            take_profit_pct: settings.exits.take_profit_pct,
            initial_stop_pct: settings.exits.initial_stop_pct,
            stop_tolerance: settings.exits.stop_tolerance,
            halt_poll_interval: chrono::Duration::seconds(settings.halts.poll_interval_secs as i64),
            resume_window: chrono::Duration::seconds(settings.halts.resume_window_secs),
            resume_stop_offset_pct: settings.halts.resume_stop_offset_pct,
        })
    }
}

/// Everything the loop mutates between iterations
pub struct LiveSessionState {
    pub tracker: PositionTracker,
    pub halts: HaltMonitor,
    pub snapshot_loaded: bool,
    pub cutoff_done: bool,
}

impl LiveSessionState {
    pub fn new(config: &LiveLoopConfig) -> Self {
        Self {
            tracker: PositionTracker::new(config.take_profit_pct, config.initial_stop_pct),
            halts: HaltMonitor::new(
                config.halt_poll_interval,
                config.resume_window,
                config.resume_stop_offset_pct,
            ),
            snapshot_loaded: false,
            cutoff_done: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Continue,
    SessionEnded,
}

pub struct LiveLoop {
    broker: Arc<dyn BrokerGateway>,
    quotes: Arc<dyn QuoteSource>,
    halt_feed: Arc<dyn HaltFeed>,
    notifier: Arc<dyn Notifier>,
    journal: TradeJournal,
    calendar: TradingCalendar,
    engine: ExitEngine,
    config: LiveLoopConfig,
    state: LiveSessionState,
}

impl LiveLoop {
    pub fn new(
        broker: Arc<dyn BrokerGateway>,
        quotes: Arc<dyn QuoteSource>,
        halt_feed: Arc<dyn HaltFeed>,
        notifier: Arc<dyn Notifier>,
        journal: TradeJournal,
        calendar: TradingCalendar,
        config: LiveLoopConfig,
    ) -> Self {
        Self {
            broker,
            quotes,
            halt_feed,
            notifier,
            journal,
            calendar,
            engine: ExitEngine::new(config.stop_tolerance),
            state: LiveSessionState::new(&config),
            config,
        }
    }

    pub fn state(&self) -> &LiveSessionState {
        &self.state
    }

    /// Iterate until session end or Ctrl-C
    pub async fn run(&mut self) -> crate::Result<()> {
        tracing::info!(
            "Live monitor started at {} (cancel {}, end {}, every {:?}, quotes: {})",
            self.calendar.format_local(self.calendar.now()),
            self.config.cancel_deadline,
            self.config.session_end,
            self.config.poll_interval,
            self.quotes.name()
        );

        loop {
            if self.run_iteration(self.calendar.now()).await == IterationOutcome::SessionEnded {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received, stopping live monitor");
                    break;
                }
            }
        }

        let now = self.calendar.now();
        self.notifier.notify(&format!(
            "[{}] live monitor finished ({} positions tracked)",
            self.calendar.format_local(now),
            self.state.tracker.len()
        ));
        Ok(())
    }

    /// One complete pass of the loop at `now`
    pub async fn run_iteration(&mut self, now: DateTime<Utc>) -> IterationOutcome {
        if now >= self.calendar.deadline(now, self.config.session_end) {
            tracing::info!("Session end reached at {}", self.calendar.format_local(now));
            return IterationOutcome::SessionEnded;
        }

        if !self.state.snapshot_loaded {
            self.load_snapshot().await;
        }

        let session = self.calendar.session_date(now);
        if self.state.tracker.roll_session(session) {
            self.state.cutoff_done = false;
        }

        if !self.state.cutoff_done && now >= self.calendar.deadline(now, self.config.cancel_deadline) {
            self.run_cutoff(now).await;
        }

        self.poll_halts(now).await;

        for symbol in self.state.tracker.symbols() {
            self.process_position(&symbol, now).await;
        }

        IterationOutcome::Continue
    }

    async fn load_snapshot(&mut self) {
        match self.broker.get_positions().await {
            Ok(positions) => {
                let count = self.state.tracker.initialize(&positions);
                self.state.snapshot_loaded = true;
                // Cutoff already swept the bracket stops of these positions
                if self.state.cutoff_done {
                    self.state.tracker.mark_all_for_stop_sync();
                }
                tracing::info!("Loaded {} open positions", count);
            }
            Err(e) => tracing::warn!("Position snapshot failed, retrying next iteration: {}", e),
        }
    }

    async fn run_cutoff(&mut self, now: DateTime<Utc>) {
        match cancel_open_orders(self.broker.as_ref()).await {
            Ok(cancelled) => {
                self.state.cutoff_done = true;
                self.state.tracker.mark_all_for_stop_sync();
                let session = self.calendar.session_date(now);
                for (symbol, order_id) in &cancelled {
                    self.notifier.notify(&format!(
                        "[{}] CANCEL {} #{}",
                        self.calendar.format_local(now),
                        symbol,
                        order_id
                    ));
                    self.journal.record_event(now, session, symbol, "cancel", order_id);
                }
                tracing::info!("Cutoff: {} resting orders cancelled, stops re-armed next", cancelled.len());
            }
            Err(e) => tracing::warn!("Cutoff failed, retrying next iteration: {}", e),
        }
    }

    async fn poll_halts(&mut self, now: DateTime<Utc>) {
        let Some(transitions) = self
            .state
            .halts
            .poll_if_due(self.halt_feed.as_ref(), self.broker.as_ref(), now)
            .await
        else {
            return;
        };

        let session = self.calendar.session_date(now);
        let stamp = self.calendar.format_local(now);
        for symbol in &transitions.halted {
            // The halt swept this position's stop
            if let Some(position) = self.state.tracker.get_mut(symbol) {
                position.stop_sync_pending = true;
            }
            self.notifier.notify(&format!("[{}] HALT {}", stamp, symbol));
            self.journal.record_event(now, session, symbol, "halt", "");
        }
        for symbol in &transitions.resumed {
            self.notifier.notify(&format!("[{}] RESUME {}", stamp, symbol));
            self.journal.record_event(now, session, symbol, "resume", "");
        }
    }

    async fn process_position(&mut self, symbol: &str, now: DateTime<Utc>) {
        if self.state.halts.is_halted(symbol) {
            tracing::debug!("{} halted, skipping", symbol);
            return;
        }

        let price = match self.quotes.get_quote(symbol).await {
            Ok(quote) => match quote.mark() {
                Some(price) => price,
                None => {
                    tracing::warn!("{} quote has no usable side, skipping", symbol);
                    return;
                }
            },
            Err(e) => {
                tracing::warn!("Quote for {} failed: {}", symbol, e);
                return;
            }
        };

        let stamp = self.calendar.format_local(now);
        let session = self.calendar.session_date(now);
        let broker = self.broker.as_ref();
        let Some(position) = self.state.tracker.get_mut(symbol) else {
            return;
        };

        if let Some(order_id) = self
            .state
            .halts
            .protect_after_resume(broker, position, price, now)
            .await
        {
            self.notifier
                .notify(&format!("[{}] RESUME-STOP {} #{}", stamp, symbol, order_id));
            self.journal.record_event(now, session, symbol, "resume_stop", &order_id);
        }

        let before = position.quantity;
        if self.engine.maybe_take_half(broker, position, price).await {
            let sold = before - position.quantity;
            self.notifier.notify(&format!(
                "[{}] HALF {} x{} @ {:.2} ({} left)",
                stamp, symbol, sold, price, position.quantity
            ));
            self.journal
                .record_event(now, session, symbol, "partial_exit", &sold.to_string());
        }

        if let Some(stop) = update_trailing_stop(position, price) {
            self.notifier
                .notify(&format!("[{}] BE-MOVE {} → SL {:.2}", stamp, symbol, stop));
            self.journal
                .record_event(now, session, symbol, "stop_moved", &format!("{:.2}", stop));
        }

        if position.stop_sync_pending && position.quantity > 0 {
            if let Err(e) = self.engine.sync_stop(broker, position).await {
                tracing::warn!("Stop sync for {} failed, retrying next iteration: {}", symbol, e);
            }
        }

        self.state.tracker.remove_if_closed(symbol);
    }
}

/// Cancel every non-terminal order, protective stops included.
/// Returns (symbol, order id) of each cancelled order.
pub async fn cancel_open_orders(broker: &dyn BrokerGateway) -> BrokerResult<Vec<(String, String)>> {
    let orders = broker.get_active_orders().await?;

    let mut cancelled = Vec::new();
    for order in &orders {
        match broker.cancel_order(&order.order_id).await {
            Ok(_) => cancelled.push((order.symbol.clone(), order.order_id.clone())),
            Err(e) => tracing::warn!("Cancel of {} #{} failed: {}", order.symbol, order.order_id, e),
        }
    }
    Ok(cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, Quote};
    use crate::test_support::{
        limit_order, stop_order, BrokerCall, MockBroker, MockHaltFeed, MockQuotes,
        RecordingNotifier,
    };

    struct Harness {
        broker: MockBroker,
        quotes: MockQuotes,
        feed: MockHaltFeed,
        notifier: RecordingNotifier,
        live: LiveLoop,
    }

    fn harness() -> Harness {
        let broker = MockBroker::new();
        let quotes = MockQuotes::new();
        let feed = MockHaltFeed::new();
        let notifier = RecordingNotifier::new();
        let config = LiveLoopConfig::from_settings(&Settings::default()).unwrap();
        let journal = TradeJournal::new(
            std::env::temp_dir().join(format!("gapbot-live-{}", uuid::Uuid::new_v4())),
        );

        let live = LiveLoop::new(
            Arc::new(broker.clone()),
            Arc::new(quotes.clone()),
            Arc::new(feed.clone()),
            Arc::new(notifier.clone()),
            journal,
            TradingCalendar::new_york(),
            config,
        );
        Harness {
            broker,
            quotes,
            feed,
            notifier,
            live,
        }
    }

    // 2026-07-15 is EDT (UTC-4)
    fn et(hms: &str) -> DateTime<Utc> {
        let local = chrono::NaiveDateTime::parse_from_str(&format!("2026-07-15 {}", hms), "%Y-%m-%d %H:%M:%S")
            .unwrap();
        TradingCalendar::new_york().local_time_on(local.date(), local.time())
    }

    #[tokio::test]
    async fn test_cutoff_fires_once_and_cancels_every_order() {
        let mut h = harness();
        h.broker.add_order(limit_order("e-1", "AAPL", OrderSide::Buy, 10));
        h.broker.add_order(stop_order("s-1", "MSFT", OrderSide::Sell, 95.0, 10));

        h.live.run_iteration(et("09:45:00")).await;
        assert!(h.broker.calls().is_empty());

        h.live.run_iteration(et("10:00:00")).await;
        assert_eq!(
            h.broker.calls(),
            vec![BrokerCall::Cancel("e-1".into()), BrokerCall::Cancel("s-1".into())]
        );
        assert!(h.broker.orders().is_empty());
        assert!(h.live.state().cutoff_done);

        // A later order is not swept again
        h.broker.add_order(limit_order("e-2", "TSLA", OrderSide::Buy, 5));
        h.live.run_iteration(et("10:00:30")).await;
        assert_eq!(h.broker.calls().len(), 2);
        assert!(h.notifier.messages().iter().any(|m| m.contains("CANCEL AAPL #e-1")));
        assert!(h.notifier.messages().iter().any(|m| m.contains("CANCEL MSFT #s-1")));
    }

    #[tokio::test]
    async fn test_cutoff_rearms_stops_of_tracked_positions() {
        let mut h = harness();
        h.broker.add_position("AAPL", 100.0, 10.0);
        h.broker.add_order(stop_order("s-1", "AAPL", OrderSide::Sell, 97.5, 10));
        h.broker.add_order(limit_order("tp-1", "AAPL", OrderSide::Sell, 10));
        h.quotes.set_price("AAPL", 100.5);

        h.live.run_iteration(et("09:59:30")).await;
        assert!(h.broker.calls().is_empty());

        h.live.run_iteration(et("10:00:00")).await;
        assert_eq!(
            h.broker.calls(),
            vec![
                BrokerCall::Cancel("s-1".into()),
                BrokerCall::Cancel("tp-1".into()),
                BrokerCall::PlaceStop {
                    symbol: "AAPL".into(),
                    qty: 10,
                    stop_price: 97.5,
                    side: OrderSide::Sell
                },
            ]
        );
        let pos = h.live.state().tracker.get("AAPL").unwrap();
        assert!(!pos.stop_sync_pending);
        assert_eq!(pos.order_ref.as_deref(), Some("stop-1"));
    }

    #[tokio::test]
    async fn test_snapshot_after_cutoff_rearms_stops() {
        let mut h = harness();
        h.broker.add_position("AAPL", 100.0, 10.0);
        h.broker.add_order(stop_order("s-1", "AAPL", OrderSide::Sell, 97.5, 10));
        h.quotes.set_price("AAPL", 100.5);
        h.broker.set_fail_positions(true);

        h.live.run_iteration(et("10:00:00")).await;
        assert!(h.live.state().cutoff_done);
        assert!(h.broker.orders().is_empty());

        h.broker.set_fail_positions(false);
        h.live.run_iteration(et("10:00:30")).await;
        let stops: Vec<_> = h.broker.orders().into_iter().filter(|o| o.symbol == "AAPL").collect();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].stop_price, Some(97.5));
    }

    #[tokio::test]
    async fn test_loop_ends_at_session_end() {
        let mut h = harness();
        assert_eq!(h.live.run_iteration(et("15:44:59")).await, IterationOutcome::Continue);
        assert_eq!(h.live.run_iteration(et("15:45:00")).await, IterationOutcome::SessionEnded);
    }

    #[tokio::test]
    async fn test_snapshot_retried_until_it_succeeds() {
        let mut h = harness();
        h.broker.add_position("AAPL", 100.0, 10.0);
        h.broker.set_fail_positions(true);

        h.live.run_iteration(et("09:40:00")).await;
        assert!(!h.live.state().snapshot_loaded);
        assert!(h.live.state().tracker.is_empty());

        h.broker.set_fail_positions(false);
        h.quotes.set_price("AAPL", 100.0);
        h.live.run_iteration(et("09:40:30")).await;
        assert!(h.live.state().snapshot_loaded);
        assert_eq!(h.live.state().tracker.len(), 1);
    }

    #[tokio::test]
    async fn test_half_target_takes_partial_and_moves_stop() {
        let mut h = harness();
        h.broker.add_position("AAPL", 100.0, 10.0);
        h.quotes.set_quote("AAPL", Quote::new(103.4, 103.6));

        h.live.run_iteration(et("09:45:00")).await;

        let pos = h.live.state().tracker.get("AAPL").unwrap();
        assert_eq!(pos.quantity, 5);
        assert!(pos.partial_exit_done);
        assert!((pos.stop_loss - 100.0).abs() < 1e-9);
        assert!(!pos.stop_sync_pending);

        assert_eq!(
            h.broker.calls(),
            vec![
                BrokerCall::PlaceMarket {
                    symbol: "AAPL".into(),
                    qty: 5,
                    side: OrderSide::Sell
                },
                BrokerCall::PlaceStop {
                    symbol: "AAPL".into(),
                    qty: 5,
                    stop_price: 100.0,
                    side: OrderSide::Sell
                },
            ]
        );

        // Oscillating around the trigger does not sell again the same day
        h.quotes.set_price("AAPL", 102.0);
        h.live.run_iteration(et("09:45:30")).await;
        h.quotes.set_price("AAPL", 104.0);
        h.live.run_iteration(et("09:46:00")).await;
        let market_orders = h
            .broker
            .calls()
            .into_iter()
            .filter(|c| matches!(c, BrokerCall::PlaceMarket { .. }))
            .count();
        assert_eq!(market_orders, 1);
    }

    #[tokio::test]
    async fn test_halted_symbol_is_left_alone() {
        let mut h = harness();
        h.broker.add_position("HALT", 10.0, 100.0);
        h.quotes.set_price("HALT", 12.0);
        h.feed.set_halted(&["HALT"]);

        h.live.run_iteration(et("09:45:00")).await;

        assert!(h.broker.calls().is_empty());
        let pos = h.live.state().tracker.get("HALT").unwrap();
        assert_eq!(pos.quantity, 100);
        assert!(h.notifier.messages().iter().any(|m| m.contains("HALT HALT")));
    }

    #[tokio::test]
    async fn test_resume_places_one_protective_stop() {
        let mut h = harness();
        h.broker.add_position("AAA", 10.0, 100.0);
        h.quotes.set_price("AAA", 10.0);
        h.feed.set_halted(&["AAA"]);
        h.live.run_iteration(et("09:45:00")).await;

        h.feed.set_halted(&[]);
        h.live.run_iteration(et("09:45:30")).await;
        h.live.run_iteration(et("09:46:00")).await;
        h.live.run_iteration(et("09:46:30")).await;

        let stops: Vec<BrokerCall> = h
            .broker
            .calls()
            .into_iter()
            .filter(|c| matches!(c, BrokerCall::PlaceStop { .. }))
            .collect();
        assert_eq!(
            stops,
            vec![BrokerCall::PlaceStop {
                symbol: "AAA".into(),
                qty: 100,
                stop_price: 9.9,
                side: OrderSide::Sell
            }]
        );
    }

    #[tokio::test]
    async fn test_stop_restored_when_resume_protection_cannot_fire() {
        let mut h = harness();
        h.broker.add_position("AAA", 10.0, 100.0);
        h.broker.add_order(stop_order("s-1", "AAA", OrderSide::Sell, 9.75, 100));
        h.feed.set_halted(&["AAA"]);

        h.live.run_iteration(et("09:45:00")).await;
        assert!(h.broker.orders().is_empty());
        assert!(h.live.state().tracker.get("AAA").unwrap().stop_sync_pending);

        // Resumes, but no usable quote until the resume window has passed
        h.feed.set_halted(&[]);
        let mut at = et("09:45:30");
        while at < et("09:51:00") {
            h.live.run_iteration(at).await;
            at += chrono::Duration::seconds(30);
        }
        assert!(h.broker.orders().is_empty());

        h.quotes.set_price("AAA", 10.0);
        h.live.run_iteration(et("09:51:00")).await;
        h.live.run_iteration(et("14:00:00")).await;

        let stops: Vec<_> = h.broker.orders().into_iter().filter(|o| o.symbol == "AAA").collect();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].stop_price, Some(9.75));
        assert_eq!(stops[0].quantity, 100);
    }

    #[tokio::test]
    async fn test_quote_failure_skips_symbol_only() {
        let mut h = harness();
        h.broker.add_position("NOQ", 10.0, 10.0);
        h.broker.add_position("AAPL", 100.0, 10.0);
        h.quotes.set_price("AAPL", 103.5);

        h.live.run_iteration(et("09:45:00")).await;

        assert_eq!(h.live.state().tracker.get("NOQ").unwrap().quantity, 10);
        assert_eq!(h.live.state().tracker.get("AAPL").unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn test_failed_stop_sync_is_retried() {
        let mut h = harness();
        h.broker.add_position("AAPL", 100.0, 1.0);
        h.quotes.set_price("AAPL", 103.5);
        h.broker.set_fail_orders(true);

        h.live.run_iteration(et("09:45:00")).await;
        assert!(h.live.state().tracker.get("AAPL").unwrap().stop_sync_pending);
        assert!(h.broker.calls().is_empty());

        h.broker.set_fail_orders(false);
        h.live.run_iteration(et("09:45:30")).await;
        let pos = h.live.state().tracker.get("AAPL").unwrap();
        assert!(!pos.stop_sync_pending);
        assert!(matches!(h.broker.calls()[0], BrokerCall::PlaceStop { qty: 1, .. }));
    }
}
