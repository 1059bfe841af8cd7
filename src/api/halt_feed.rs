use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;

use super::broker::{BrokerError, BrokerResult};

// Nasdaq Trader trade-halt RSS (covers all US listing venues)
pub const NASDAQ_HALTS_URL: &str = "https://www.nasdaqtrader.com/rss.aspx?feed=tradehalts";

/// Market-wide source of currently halted symbols
#[async_trait]
pub trait HaltFeed: Send + Sync {
    async fn fetch_halted_symbols(&self) -> BrokerResult<HashSet<String>>;
}

/// Reads the Nasdaq Trader halt RSS
#[derive(Clone)]
pub struct NasdaqHaltFeed {
    client: Client,
    url: String,
}

impl NasdaqHaltFeed {
    pub fn new(url: &str, timeout: Duration) -> BrokerResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl HaltFeed for NasdaqHaltFeed {
    async fn fetch_halted_symbols(&self) -> BrokerResult<HashSet<String>> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body = response.text().await?;
        let halted = parse_halts_rss(&body)?;
        tracing::debug!(count = halted.len(), "Fetched halt feed");
        Ok(halted)
    }
}

#[derive(Clone, Copy)]
enum ItemField {
    Symbol,
    Resumption,
}

#[derive(Default)]
struct HaltItem {
    symbol: String,
    resumption: String,
}

/// Symbols whose latest halt has no resumption trade time yet.
///
/// A feed that is not well-formed or never closes its channel is a `Shape`
/// error; a truncated feed must not read as "everything resumed".
pub fn parse_halts_rss(xml: &str) -> BrokerResult<HashSet<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut halted = HashSet::new();
    let mut item: Option<HaltItem> = None;
    let mut field: Option<ItemField> = None;
    let mut channel_closed = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| BrokerError::Shape(format!("halt feed: {}", e)))?;

        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"item" => item = Some(HaltItem::default()),
                b"IssueSymbol" if item.is_some() => field = Some(ItemField::Symbol),
                b"ResumptionTradeTime" if item.is_some() => field = Some(ItemField::Resumption),
                _ => field = None,
            },
            Event::Text(t) => {
                if let (Some(f), Some(current)) = (field, item.as_mut()) {
                    let text = t
                        .unescape()
                        .map_err(|e| BrokerError::Shape(format!("halt feed: {}", e)))?;
                    push_field(current, f, &text);
                }
            }
            Event::CData(c) => {
                if let (Some(f), Some(current)) = (field, item.as_mut()) {
                    push_field(current, f, &String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"item" => {
                    field = None;
                    if let Some(done) = item.take() {
                        let symbol = done.symbol.trim().to_ascii_uppercase();
                        // Missing or empty resumption time means still halted
                        if !symbol.is_empty() && done.resumption.trim().is_empty() {
                            halted.insert(symbol);
                        }
                    }
                }
                b"channel" => channel_closed = true,
                _ => field = None,
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !channel_closed {
        return Err(BrokerError::Shape("halt feed has no complete channel".into()));
    }
    Ok(halted)
}

fn push_field(item: &mut HaltItem, field: ItemField, text: &str) {
    match field {
        ItemField::Symbol => item.symbol.push_str(text),
        ItemField::Resumption => item.resumption.push_str(text),
    }
}
