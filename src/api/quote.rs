use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::broker::BrokerResult;
use crate::models::Quote;

/// Current bid/ask for a symbol; providers are interchangeable
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_quote(&self, symbol: &str) -> BrokerResult<Quote>;
}

/// Which vendor feeds quotes into the live loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QuoteProvider {
    Webull,
    Alpaca,
    Polygon,
}

impl std::fmt::Display for QuoteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuoteProvider::Webull => write!(f, "webull"),
            QuoteProvider::Alpaca => write!(f, "alpaca"),
            QuoteProvider::Polygon => write!(f, "polygon"),
        }
    }
}
