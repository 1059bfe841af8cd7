use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

use super::broker::{BrokerError, BrokerResult};
use super::quote::QuoteSource;
use super::shape;
use crate::models::Quote;

pub const POLYGON_API_BASE: &str = "https://api.polygon.io";

/// Snapshot client for Polygon.io
#[derive(Clone)]
pub struct PolygonClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl PolygonClient {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> BrokerResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Build from POLYGON_API_KEY
    pub fn from_env(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let api_key = std::env::var("POLYGON_API_KEY")
            .map_err(|_| anyhow::anyhow!("POLYGON_API_KEY not found in environment"))?;
        Ok(Self::new(base_url, api_key, timeout)?)
    }
}

#[async_trait]
impl QuoteSource for PolygonClient {
    fn name(&self) -> &'static str {
        "polygon"
    }

    async fn get_quote(&self, symbol: &str) -> BrokerResult<Quote> {
        let url = format!(
            "{}/v2/snapshot/locale/us/markets/stocks/tickers/{}",
            self.base_url, symbol
        );

        let response = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str())])
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

        let body: Value = response
            .json()
            .await
            .map_err(|e| BrokerError::Shape(e.to_string()))?;

        // lastQuote: p = bid, P = ask
        let last_quote = body
            .get("ticker")
            .and_then(|t| t.get("lastQuote"))
            .ok_or_else(|| BrokerError::Shape(format!("no lastQuote for {}", symbol)))?;
        let bid = shape::number(last_quote, &["p"]).unwrap_or(0.0);
        let ask = shape::number(last_quote, &["P"]).unwrap_or(0.0);

        Ok(Quote::new(bid, ask))
    }
}
