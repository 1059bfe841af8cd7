use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::broker::{BrokerError, BrokerResult};
use super::quote::QuoteSource;
use crate::models::Quote;

// Alpaca Market Data API v2
// Docs: https://docs.alpaca.markets/reference/stocklatestquotesingle
pub const ALPACA_DATA_API: &str = "https://data.alpaca.markets";

/// Latest-quote client for Alpaca's free IEX feed
#[derive(Clone)]
pub struct AlpacaQuoteClient {
    client: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct LatestQuoteResponse {
    quote: RawQuote,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    #[serde(rename = "bp", default)]
    bid_price: f64,
    #[serde(rename = "ap", default)]
    ask_price: f64,
}

impl AlpacaQuoteClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        secret_key: String,
        timeout: Duration,
    ) -> BrokerResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            secret_key,
        })
    }

    /// Build from ALPACA_API_KEY / ALPACA_SECRET_KEY
    pub fn from_env(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let api_key = std::env::var("ALPACA_API_KEY")
            .map_err(|_| anyhow::anyhow!("ALPACA_API_KEY not found in environment"))?;
        let secret_key = std::env::var("ALPACA_SECRET_KEY")
            .map_err(|_| anyhow::anyhow!("ALPACA_SECRET_KEY not found in environment"))?;
        Ok(Self::new(base_url, api_key, secret_key, timeout)?)
    }
}

#[async_trait]
impl QuoteSource for AlpacaQuoteClient {
    fn name(&self) -> &'static str {
        "alpaca"
    }

    async fn get_quote(&self, symbol: &str) -> BrokerResult<Quote> {
        let url = format!("{}/v2/stocks/{}/quotes/latest", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .query(&[("feed", "iex")])
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BrokerError::Auth(response.text().await.unwrap_or_default()));
        }
        if !status.is_success() {
            return Err(BrokerError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: LatestQuoteResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Shape(e.to_string()))?;
        tracing::debug!(symbol, bid = body.quote.bid_price, ask = body.quote.ask_price, "Alpaca quote");

        Ok(Quote::new(body.quote.bid_price, body.quote.ask_price))
    }
}
