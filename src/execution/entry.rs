use chrono::{DateTime, NaiveDate, Utc};

use crate::api::{round_cents, BracketOrder, BrokerGateway, QuoteSource};
use crate::config::EntrySettings;
use crate::journal::TradeJournal;
use crate::models::{Candidate, OrderSide, Quote};

/// Share of equity a single position may never exceed
pub const MAX_POSITION_PCT: f64 = 0.05;

/// Risk-sized share count, capped at 5% of equity
pub fn calc_shares(equity: f64, price: f64, kelly: f64, max_loss_pct: f64) -> u64 {
    calc_shares_capped(equity, price, kelly, max_loss_pct, MAX_POSITION_PCT)
}

pub fn calc_shares_capped(
    equity: f64,
    price: f64,
    kelly: f64,
    max_loss_pct: f64,
    max_position_pct: f64,
) -> u64 {
    if price <= 0.0 || equity <= 0.0 {
        return 0;
    }
    let by_risk = equity * max_loss_pct * kelly / price;
    let by_cap = equity * max_position_pct / price;
    by_risk.min(by_cap).floor().max(0.0) as u64
}

/// Sizing and bracket parameters for one entry batch
#[derive(Debug, Clone)]
pub struct EntryParams {
    pub equity: f64,
    pub kelly: f64,
    pub max_loss_pct: f64,
    pub max_position_pct: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub limit_markup_pct: f64,
}

impl EntryParams {
    pub fn from_settings(equity: f64, take_profit_pct: f64, entry: &EntrySettings) -> Self {
        Self {
            equity,
            kelly: entry.kelly,
            max_loss_pct: entry.max_loss_pct,
            max_position_pct: entry.max_position_pct,
            take_profit_pct,
            stop_loss_pct: entry.stop_loss_pct,
            limit_markup_pct: entry.limit_markup_pct,
        }
    }
}

/// Why a candidate got no order
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    OneSidedQuote,
    ZeroShares,
    QuoteFailed(String),
    OrderRejected(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::OneSidedQuote => write!(f, "bid/ask missing"),
            SkipReason::ZeroShares => write!(f, "size rounds to 0 shares"),
            SkipReason::QuoteFailed(e) => write!(f, "quote failed: {}", e),
            SkipReason::OrderRejected(e) => write!(f, "order rejected: {}", e),
        }
    }
}

/// Build the bracketed limit buy for `symbol` at the current quote
pub fn plan_entry(symbol: &str, quote: &Quote, params: &EntryParams) -> Result<BracketOrder, SkipReason> {
    if !quote.is_two_sided() {
        return Err(SkipReason::OneSidedQuote);
    }

    let mid = (quote.bid_price + quote.ask_price) / 2.0;
    let limit = mid * (1.0 + params.limit_markup_pct);
    let shares = calc_shares_capped(
        params.equity,
        limit,
        params.kelly,
        params.max_loss_pct,
        params.max_position_pct,
    );
    if shares == 0 {
        return Err(SkipReason::ZeroShares);
    }

    Ok(BracketOrder {
        symbol: symbol.to_string(),
        side: OrderSide::Buy,
        quantity: shares,
        limit_price: round_cents(limit),
        take_profit: round_cents(limit * (1.0 + params.take_profit_pct)),
        stop_loss: round_cents(limit * (1.0 - params.stop_loss_pct)),
        extended_hours: true,
    })
}

#[derive(Debug, Default)]
pub struct EntryReport {
    /// (symbol, order id)
    pub placed: Vec<(String, String)>,
    pub skipped: Vec<(String, SkipReason)>,
}

/// Submit one bracketed entry per candidate, journaling each placement
pub async fn place_entries(
    broker: &dyn BrokerGateway,
    quotes: &dyn QuoteSource,
    journal: &TradeJournal,
    candidates: &[Candidate],
    params: &EntryParams,
    now: DateTime<Utc>,
    session: NaiveDate,
) -> EntryReport {
    let mut report = EntryReport::default();
    tracing::info!("Processing {} tickers for entry", candidates.len());

    for candidate in candidates {
        let symbol = candidate.symbol.as_str();

        let quote = match quotes.get_quote(symbol).await {
            Ok(quote) => quote,
            Err(e) => {
                tracing::warn!("{}: quote failed, skipping: {}", symbol, e);
                report.skipped.push((symbol.to_string(), SkipReason::QuoteFailed(e.to_string())));
                continue;
            }
        };

        let order = match plan_entry(symbol, &quote, params) {
            Ok(order) => order,
            Err(reason) => {
                tracing::info!("{}: {}, skipping", symbol, reason);
                report.skipped.push((symbol.to_string(), reason));
                continue;
            }
        };

        match broker.place_bracket_order(&order).await {
            Ok(order_id) => {
                tracing::info!(
                    "{}: limit {:.2} x{} (TP {:.2} / SL {:.2}) -> order {}",
                    symbol,
                    order.limit_price,
                    order.quantity,
                    order.take_profit,
                    order.stop_loss,
                    order_id
                );
                journal.record_entry(
                    now,
                    session,
                    symbol,
                    order.quantity,
                    order.limit_price,
                    order.take_profit,
                    order.stop_loss,
                    &order_id,
                );
                report.placed.push((symbol.to_string(), order_id));
            }
            Err(e) => {
                tracing::warn!("{}: entry order failed: {}", symbol, e);
                report.skipped.push((symbol.to_string(), SkipReason::OrderRejected(e.to_string())));
            }
        }
    }

    report
}
